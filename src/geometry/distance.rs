//! Exact point-to-mesh distance queries against posed bodies.
//!
//! Brute-force over all faces; the meshes this estimator deals with are
//! small enough that an acceleration structure would not pay for itself,
//! and the L1 tie-break semantics (first-seen face wins) are easiest to
//! keep exact this way. Scene points are swept in parallel.

use nalgebra::{DVector, Isometry3, Matrix3xX, Vector3};
use rayon::prelude::*;

use super::mesh::MeshBank;
use super::triangle::{closest_point_on_triangle, triangle_normal};

/// Per-scene-point result of [`exact_collision_detect`].
#[derive(Debug, Clone)]
pub struct SurfaceProjection {
    /// L1 distance to the selected closest point.
    pub phi: DVector<f64>,
    /// Outward normal of the selected face, in world frame.
    pub normals: Matrix3xX<f64>,
    /// Closest point on the posed mesh, world frame.
    pub world_closest: Matrix3xX<f64>,
    /// The same point expressed in the hosting body's frame.
    pub body_closest: Matrix3xX<f64>,
    /// 1-based hosting body id per scene point.
    pub body_idx: Vec<usize>,
}

/// Closest posed face per scene point, by minimum L1 distance.
///
/// `poses[b]` is the world pose of body `b+1`. Ties between faces keep the
/// first face seen, matching the deterministic iteration order over the
/// bank.
pub fn exact_collision_detect(
    mesh: &MeshBank,
    poses: &[Isometry3<f64>],
    scene: &Matrix3xX<f64>,
) -> SurfaceProjection {
    debug_assert_eq!(poses.len(), mesh.num_bodies());
    let n = scene.ncols();

    struct PointHit {
        phi: f64,
        normal: Vector3<f64>,
        world: Vector3<f64>,
        body: Vector3<f64>,
        body_idx: usize,
    }

    let hits: Vec<PointHit> = (0..n)
        .into_par_iter()
        .map(|i| {
            let s: Vector3<f64> = scene.column(i).into();
            let mut best = PointHit {
                phi: f64::INFINITY,
                normal: Vector3::zeros(),
                world: Vector3::zeros(),
                body: Vector3::zeros(),
                body_idx: 0,
            };
            for f in 0..mesh.num_faces() {
                let body_id = mesh.face_body()[f];
                let tf = &poses[body_id - 1];
                let [v0, v1, v2] = mesh.face_vertices(f);
                let w0 = tf.transform_point(&v0.into()).coords;
                let w1 = tf.transform_point(&v1.into()).coords;
                let w2 = tf.transform_point(&v2.into()).coords;
                let closest = closest_point_on_triangle(&w0, &w1, &w2, &s);
                let dist = (closest - s).abs().sum();
                if dist < best.phi {
                    best.phi = dist;
                    best.normal = triangle_normal(&w0, &w1, &w2);
                    best.world = closest;
                    best.body = tf.inverse_transform_point(&closest.into()).coords;
                    best.body_idx = body_id;
                }
            }
            best
        })
        .collect();

    let mut phi = DVector::zeros(n);
    let mut normals = Matrix3xX::zeros(n);
    let mut world_closest = Matrix3xX::zeros(n);
    let mut body_closest = Matrix3xX::zeros(n);
    let mut body_idx = vec![0; n];
    for (i, hit) in hits.into_iter().enumerate() {
        phi[i] = hit.phi;
        normals.set_column(i, &hit.normal);
        world_closest.set_column(i, &hit.world);
        body_closest.set_column(i, &hit.body);
        body_idx[i] = hit.body_idx;
    }

    SurfaceProjection {
        phi,
        normals,
        world_closest,
        body_closest,
        body_idx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mesh::TriangleMeshData;
    use approx::assert_relative_eq;
    use nalgebra::Translation3;

    fn unit_cube_bank() -> MeshBank {
        MeshBank::from_body_meshes(&[TriangleMeshData::axis_aligned_box([1.0, 1.0, 1.0])]).unwrap()
    }

    #[test]
    fn test_point_on_surface_has_zero_phi() {
        let bank = unit_cube_bank();
        let poses = vec![Isometry3::identity()];
        let scene = Matrix3xX::from_columns(&[Vector3::new(0.5, 0.0, 0.0)]);

        let proj = exact_collision_detect(&bank, &poses, &scene);
        assert_relative_eq!(proj.phi[0], 0.0, epsilon = 1e-12);
        assert_eq!(proj.body_idx[0], 1);
    }

    #[test]
    fn test_outside_point_projects_to_face() {
        let bank = unit_cube_bank();
        let poses = vec![Isometry3::identity()];
        let scene = Matrix3xX::from_columns(&[Vector3::new(1.5, 0.0, 0.0)]);

        let proj = exact_collision_detect(&bank, &poses, &scene);
        assert_relative_eq!(proj.phi[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(proj.world_closest[(0, 0)], 0.5, epsilon = 1e-12);
        // Outward normal of the +x face.
        assert_relative_eq!(proj.normals[(0, 0)].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_posed_body_offsets_projection() {
        let bank = unit_cube_bank();
        let poses = vec![Isometry3::from_parts(
            Translation3::new(10.0, 0.0, 0.0),
            Default::default(),
        )];
        let scene = Matrix3xX::from_columns(&[Vector3::new(12.0, 0.0, 0.0)]);

        let proj = exact_collision_detect(&bank, &poses, &scene);
        assert_relative_eq!(proj.phi[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(proj.world_closest[(0, 0)], 10.5, epsilon = 1e-12);
        // Body-frame closest point is on the local +x face.
        assert_relative_eq!(proj.body_closest[(0, 0)], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_two_bodies_nearest_wins() {
        let a = TriangleMeshData::axis_aligned_box([1.0, 1.0, 1.0]);
        let b = TriangleMeshData::axis_aligned_box([1.0, 1.0, 1.0]);
        let bank = MeshBank::from_body_meshes(&[a, b]).unwrap();
        let poses = vec![
            Isometry3::identity(),
            Isometry3::from_parts(Translation3::new(5.0, 0.0, 0.0), Default::default()),
        ];
        let scene = Matrix3xX::from_columns(&[
            Vector3::new(0.1, 0.0, 0.0),
            Vector3::new(5.1, 0.0, 0.0),
        ]);

        let proj = exact_collision_detect(&bank, &poses, &scene);
        assert_eq!(proj.body_idx, vec![1, 2]);
    }
}
