//! Surface-area-weighted sampling of a mesh bank.

use nalgebra::{DMatrix, Matrix3xX};
use rand::Rng;

use super::mesh::MeshBank;
use super::triangle::triangle_area;

/// Draw `k` points uniformly over the total surface area of the bank.
///
/// Builds the cumulative normalized face-area distribution once, then per
/// sample picks a face by binary search on the CDF and a point inside it by
/// rejection-sampling barycentric parameters until `s1 + s2 < 1`.
///
/// Returns the sampled points (3×k, body frame) and the body indicator
/// matrix `B' ∈ {0,1}^(num_bodies×k)` with `B'[face_body[f]-1, i] = 1`.
pub fn surface_area_weighted_sample<R: Rng>(
    mesh: &MeshBank,
    k: usize,
    rng: &mut R,
) -> (Matrix3xX<f64>, DMatrix<f64>) {
    // Cumulative normalized areas over faces.
    let mut cumulative = Vec::with_capacity(mesh.num_faces());
    let mut total = 0.0;
    for f in 0..mesh.num_faces() {
        let [v0, v1, v2] = mesh.face_vertices(f);
        total += triangle_area(&v0, &v1, &v2);
        cumulative.push(total);
    }
    for c in cumulative.iter_mut() {
        *c /= total;
    }

    let mut points = Matrix3xX::zeros(k);
    let mut body_indicator = DMatrix::zeros(mesh.num_bodies(), k);

    for i in 0..k {
        let u: f64 = rng.gen_range(1e-12..(1.0 - 1e-12));
        let face = match cumulative.binary_search_by(|c| c.total_cmp(&u)) {
            Ok(f) | Err(f) => f.min(mesh.num_faces() - 1),
        };

        let [v0, v1, v2] = mesh.face_vertices(face);
        let mut s1 = 1.0;
        let mut s2 = 1.0;
        while s1 + s2 >= 1.0 {
            s1 = rng.gen_range(0.0..1.0);
            s2 = rng.gen_range(0.0..1.0);
        }
        points.set_column(i, &(v0 + (v1 - v0) * s1 + (v2 - v0) * s2));
        body_indicator[(mesh.face_body()[face] - 1, i)] = 1.0;
    }

    (points, body_indicator)
}
