//! Mesh aggregation across bodies.
//!
//! Every body's collision mesh is merged into a single vertex/face bank with
//! a per-face body tag, the layout the correspondence formulations index
//! into. Body ids are 1-based; id 0 is reserved for the world and never
//! appears in `face_body`.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, Matrix3xX, Vector3};
use tracing::debug;

use super::triangle::triangle_area;

/// Plain triangle-mesh data in a single frame.
#[derive(Debug, Clone)]
pub struct TriangleMeshData {
    pub vertices: Vec<Vector3<f64>>,
    pub triangles: Vec<[usize; 3]>,
}

impl TriangleMeshData {
    /// Axis-aligned box centered at the origin with the given edge lengths.
    pub fn axis_aligned_box(size: [f64; 3]) -> Self {
        let [hx, hy, hz] = [size[0] / 2.0, size[1] / 2.0, size[2] / 2.0];
        let vertices = vec![
            Vector3::new(-hx, -hy, -hz),
            Vector3::new(hx, -hy, -hz),
            Vector3::new(hx, hy, -hz),
            Vector3::new(-hx, hy, -hz),
            Vector3::new(-hx, -hy, hz),
            Vector3::new(hx, -hy, hz),
            Vector3::new(hx, hy, hz),
            Vector3::new(-hx, hy, hz),
        ];
        // Two triangles per face, outward winding per the kernel convention.
        let triangles = vec![
            [0, 2, 1],
            [0, 3, 2], // bottom (-z)
            [4, 5, 6],
            [4, 6, 7], // top (+z)
            [0, 1, 5],
            [0, 5, 4], // front (-y)
            [2, 3, 7],
            [2, 7, 6], // back (+y)
            [0, 4, 7],
            [0, 7, 3], // left (-x)
            [1, 2, 6],
            [1, 6, 5], // right (+x)
        ];
        Self {
            vertices,
            triangles,
        }
    }
}

/// All body meshes stacked into one indexable bank.
///
/// `vertices` is the 3×Nv stack of every body's vertices in its own body
/// frame; `faces` index into that stack; `face_body[f]` is the 1-based id of
/// the body hosting face `f`.
#[derive(Debug, Clone)]
pub struct MeshBank {
    vertices: Matrix3xX<f64>,
    faces: Vec<[usize; 3]>,
    face_body: Vec<usize>,
    num_bodies: usize,
}

impl MeshBank {
    /// Stack per-body meshes, offsetting face indices past the vertices of
    /// the preceding bodies.
    pub fn from_body_meshes(meshes: &[TriangleMeshData]) -> Result<Self> {
        if meshes.is_empty() {
            bail!("Mesh bank needs at least one body mesh");
        }

        let total_vertices: usize = meshes.iter().map(|m| m.vertices.len()).sum();
        let mut vertices = Matrix3xX::zeros(total_vertices);
        let mut faces = Vec::new();
        let mut face_body = Vec::new();

        let mut offset = 0;
        for (body_i, mesh) in meshes.iter().enumerate() {
            for (k, v) in mesh.vertices.iter().enumerate() {
                vertices.set_column(offset + k, v);
            }
            for tri in &mesh.triangles {
                let face = [tri[0] + offset, tri[1] + offset, tri[2] + offset];
                for &ix in &face {
                    if ix >= offset + mesh.vertices.len() || ix < offset {
                        bail!(
                            "Face index {ix} out of range for body {} ({} vertices)",
                            body_i + 1,
                            mesh.vertices.len()
                        );
                    }
                }
                faces.push(face);
                face_body.push(body_i + 1);
            }
            offset += mesh.vertices.len();
        }

        let bank = Self {
            vertices,
            faces,
            face_body,
            num_bodies: meshes.len(),
        };
        for f in 0..bank.num_faces() {
            let [v0, v1, v2] = bank.face_vertices(f);
            debug_assert!(triangle_area(&v0, &v1, &v2) > 0.0, "zero-area face {f}");
        }
        debug!(
            num_bodies = bank.num_bodies,
            num_vertices = bank.num_vertices(),
            num_faces = bank.num_faces(),
            "Mesh bank assembled"
        );
        Ok(bank)
    }

    pub fn num_bodies(&self) -> usize {
        self.num_bodies
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.ncols()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn vertices(&self) -> &Matrix3xX<f64> {
        &self.vertices
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// 1-based hosting body id per face.
    pub fn face_body(&self) -> &[usize] {
        &self.face_body
    }

    /// The three corner positions of face `f`, in body frame.
    pub fn face_vertices(&self, f: usize) -> [Vector3<f64>; 3] {
        let [a, b, c] = self.faces[f];
        [
            self.vertices.column(a).into(),
            self.vertices.column(b).into(),
            self.vertices.column(c).into(),
        ]
    }

    /// Face-membership matrix `F ∈ {0,1}^(Nf×Nv)`: `F[i,j]=1` iff vertex j
    /// belongs to face i. Each row has exactly three ones.
    pub fn face_membership(&self) -> DMatrix<f64> {
        let mut f = DMatrix::zeros(self.num_faces(), self.num_vertices());
        for (i, face) in self.faces.iter().enumerate() {
            for &j in face {
                f[(i, j)] = 1.0;
            }
        }
        f
    }

    /// Body-membership matrix `Bm ∈ {0,1}^(B×Nf)`: `Bm[b,f]=1` iff face f
    /// belongs to body b+1. Each column has exactly one one.
    pub fn body_membership(&self) -> DMatrix<f64> {
        let mut bm = DMatrix::zeros(self.num_bodies, self.num_faces());
        for (f, &body) in self.face_body.iter().enumerate() {
            bm[(body - 1, f)] = 1.0;
        }
        bm
    }

    /// Longest edge over all faces. Zero only for an all-degenerate bank,
    /// which disables the same-face gate downstream.
    pub fn widest_face_edge(&self) -> f64 {
        let mut widest: f64 = 0.0;
        for f in 0..self.num_faces() {
            let verts = self.face_vertices(f);
            for i in 0..3 {
                for j in (i + 1)..3 {
                    widest = widest.max((verts[i] - verts[j]).norm());
                }
            }
        }
        debug_assert!(widest >= 0.0);
        widest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_box_mesh_shape() {
        let mesh = TriangleMeshData::axis_aligned_box([1.0, 1.0, 1.0]);
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.triangles.len(), 12);
        for tri in &mesh.triangles {
            let area = triangle_area(
                &mesh.vertices[tri[0]],
                &mesh.vertices[tri[1]],
                &mesh.vertices[tri[2]],
            );
            assert_relative_eq!(area, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_bank_stacking_two_bodies() {
        let a = TriangleMeshData::axis_aligned_box([1.0, 1.0, 1.0]);
        let b = TriangleMeshData::axis_aligned_box([2.0, 2.0, 2.0]);
        let bank = MeshBank::from_body_meshes(&[a, b]).unwrap();

        assert_eq!(bank.num_bodies(), 2);
        assert_eq!(bank.num_vertices(), 16);
        assert_eq!(bank.num_faces(), 24);

        // Second body's faces index into the second vertex block.
        for f in 12..24 {
            assert_eq!(bank.face_body()[f], 2);
            for &ix in &bank.faces()[f] {
                assert!(ix >= 8);
            }
        }
    }

    #[test]
    fn test_membership_matrices() {
        let mesh = TriangleMeshData::axis_aligned_box([1.0, 1.0, 1.0]);
        let bank = MeshBank::from_body_meshes(&[mesh]).unwrap();

        let f = bank.face_membership();
        assert_eq!(f.nrows(), 12);
        assert_eq!(f.ncols(), 8);
        for i in 0..f.nrows() {
            assert_relative_eq!(f.row(i).sum(), 3.0, epsilon = 1e-12);
        }

        let bm = bank.body_membership();
        assert_eq!(bm.nrows(), 1);
        assert_eq!(bm.ncols(), 12);
        for j in 0..bm.ncols() {
            assert_relative_eq!(bm.column(j).sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_widest_face_edge_unit_cube() {
        let mesh = TriangleMeshData::axis_aligned_box([1.0, 1.0, 1.0]);
        let bank = MeshBank::from_body_meshes(&[mesh]).unwrap();
        // Face diagonal of a unit cube.
        assert_relative_eq!(bank.widest_face_edge(), 2.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_empty_bank_rejected() {
        assert!(MeshBank::from_body_meshes(&[]).is_err());
    }
}
