//! Reconstruction of generalized coordinates from solver variable values.
//!
//! Relaxed rotation matrices are generally not orthonormal, so inversion
//! goes through a general matrix inverse and the rpy read-off uses the
//! closed-form atan2 expressions, which stay well defined (if approximate)
//! off the manifold.

use nalgebra::{DVector, Isometry3, Matrix3, Rotation3, Translation3, Vector3};

use crate::estimator::transform_vars::BodyTransformVars;

/// A possibly-non-orthonormal rigid-transform estimate.
#[derive(Debug, Clone)]
pub struct AffineEstimate {
    pub r: Matrix3<f64>,
    pub t: Vector3<f64>,
}

impl AffineEstimate {
    /// Read one body's transform out of a solver value vector.
    pub fn from_values(tf: &BodyTransformVars, values: &[f64]) -> Self {
        let t = Vector3::new(
            values[tf.translation[0].index()],
            values[tf.translation[1].index()],
            values[tf.translation[2].index()],
        );
        let r = Matrix3::from_fn(|i, j| values[tf.rotation[i][j].index()]);
        Self { r, t }
    }

    /// General affine inverse; `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let r_inv = self.r.try_inverse()?;
        Some(Self {
            r: r_inv,
            t: -(r_inv * self.t),
        })
    }

    pub fn is_finite(&self) -> bool {
        self.r.iter().all(|v| v.is_finite()) && self.t.iter().all(|v| v.is_finite())
    }

    /// Project onto a proper isometry (nearest rotation to `r`).
    pub fn to_isometry(&self) -> Isometry3<f64> {
        let rotation = Rotation3::from_matrix(&self.r);
        Isometry3::from_parts(Translation3::from(self.t), rotation.into())
    }

    /// Translation plus rpy angles, the per-body slice of q.
    pub fn state_slice(&self) -> [f64; 6] {
        let (roll, pitch, yaw) = rotmat_to_rpy(&self.r);
        [self.t.x, self.t.y, self.t.z, roll, pitch, yaw]
    }
}

/// Roll/pitch/yaw of a (near-)rotation matrix, `R ≈ Rz(y)·Ry(p)·Rx(r)`.
pub fn rotmat_to_rpy(r: &Matrix3<f64>) -> (f64, f64, f64) {
    let roll = r[(2, 1)].atan2(r[(2, 2)]);
    let pitch = (-r[(2, 0)]).atan2((r[(0, 0)].powi(2) + r[(1, 0)].powi(2)).sqrt());
    let yaw = r[(1, 0)].atan2(r[(0, 0)]);
    (roll, pitch, yaw)
}

/// Per-body transforms from solver values, inverted to body-in-world when
/// the formulation parameterized world→body. `None` when any transform is
/// singular or non-finite.
pub fn reconstruct_poses(
    transforms: &[BodyTransformVars],
    values: &[f64],
    invert: bool,
) -> Option<Vec<AffineEstimate>> {
    let mut poses = Vec::with_capacity(transforms.len());
    for tf in transforms {
        let estimate = AffineEstimate::from_values(tf, values);
        let pose = if invert { estimate.inverse()? } else { estimate };
        if !pose.is_finite() {
            return None;
        }
        poses.push(pose);
    }
    Some(poses)
}

/// Stack per-body state slices into a generalized-coordinate vector.
pub fn poses_to_state(poses: &[AffineEstimate]) -> DVector<f64> {
    let mut q = DVector::zeros(6 * poses.len());
    for (b, pose) in poses.iter().enumerate() {
        let slice = pose.state_slice();
        for (k, v) in slice.iter().enumerate() {
            q[6 * b + k] = *v;
        }
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rpy_round_trip() {
        for (roll, pitch, yaw) in [(0.1, -0.2, 0.3), (0.0, 0.0, 1.5), (-1.0, 0.4, -0.9)] {
            let r = Rotation3::from_euler_angles(roll, pitch, yaw).into_inner();
            let (r2, p2, y2) = rotmat_to_rpy(&r);
            assert_relative_eq!(r2, roll, epsilon = 1e-10);
            assert_relative_eq!(p2, pitch, epsilon = 1e-10);
            assert_relative_eq!(y2, yaw, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_affine_inverse_round_trip() {
        let estimate = AffineEstimate {
            r: Rotation3::from_euler_angles(0.2, 0.3, -0.4).into_inner(),
            t: Vector3::new(1.0, -2.0, 0.5),
        };
        let inv = estimate.inverse().unwrap();
        let composed_r = estimate.r * inv.r;
        let composed_t = estimate.r * inv.t + estimate.t;
        for i in 0..3 {
            assert_relative_eq!(composed_t[i], 0.0, epsilon = 1e-12);
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(composed_r[(i, j)], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_singular_linear_part_rejected() {
        let estimate = AffineEstimate {
            r: Matrix3::zeros(),
            t: Vector3::zeros(),
        };
        assert!(estimate.inverse().is_none());
    }
}
