//! Synthetic models and scene clouds for testing with known ground truth.

use nalgebra::{Isometry3, Matrix3xX, Vector3};

use crate::model::config::{GeometrySpec, ModelEntry, ModelSetConfig};

/// A single unit cube model at the given 6-dof ground-truth state.
pub fn unit_cube_config(q0: [f64; 6]) -> ModelSetConfig {
    ModelSetConfig {
        models: vec![ModelEntry {
            name: "cube".into(),
            geometry: GeometrySpec::Box {
                size: [1.0, 1.0, 1.0],
            },
            q0: q0.to_vec(),
        }],
    }
}

/// A single-triangle model in the z = 0 plane.
pub fn single_triangle_config(q0: [f64; 6]) -> ModelSetConfig {
    ModelSetConfig {
        models: vec![ModelEntry {
            name: "tri".into(),
            geometry: GeometrySpec::Mesh {
                vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                triangles: vec![[0, 1, 2]],
            },
            q0: q0.to_vec(),
        }],
    }
}

/// Hand-picked points on distinct faces of the unit cube (body frame),
/// chosen to pin down all six degrees of freedom.
pub fn cube_face_points() -> Matrix3xX<f64> {
    Matrix3xX::from_columns(&[
        Vector3::new(0.5, 0.1, 0.2),
        Vector3::new(-0.5, -0.2, 0.1),
        Vector3::new(0.1, 0.5, -0.2),
        Vector3::new(0.2, -0.5, 0.3),
        Vector3::new(-0.1, 0.2, 0.5),
        Vector3::new(0.3, -0.1, -0.5),
    ])
}

/// Transform every column of a cloud by a rigid pose.
pub fn transform_cloud(cloud: &Matrix3xX<f64>, pose: &Isometry3<f64>) -> Matrix3xX<f64> {
    let mut out = Matrix3xX::zeros(cloud.ncols());
    for i in 0..cloud.ncols() {
        let p: Vector3<f64> = cloud.column(i).into();
        out.set_column(i, &pose.transform_point(&p.into()).coords);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Translation3;

    #[test]
    fn test_cube_face_points_on_surface() {
        let points = cube_face_points();
        for i in 0..points.ncols() {
            let p: Vector3<f64> = points.column(i).into();
            let max_coord = p.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
            assert_relative_eq!(max_coord, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_transform_cloud_translates() {
        let cloud = cube_face_points();
        let pose = Isometry3::from_parts(Translation3::new(1.0, 2.0, 3.0), Default::default());
        let moved = transform_cloud(&cloud, &pose);
        assert_relative_eq!(moved[(0, 0)] - cloud[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(moved[(2, 3)] - cloud[(2, 3)], 3.0, epsilon = 1e-12);
    }
}
