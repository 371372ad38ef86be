//! Rigid-body set: the read-only kinematic view the estimator works over.
//!
//! Every body is free-floating with six generalized coordinates
//! (translation + roll/pitch/yaw), stacked body after body into
//! `q ∈ ℝ^(6B)`. Body ids are 1-based throughout; id 0 is the world.

pub mod config;

use nalgebra::{DVector, Isometry3, Matrix3, Matrix3x6, Rotation3, Translation3, Vector3};

use crate::geometry::TriangleMeshData;
use config::{ModelConfigError, ModelSetConfig};

/// One estimated body: a name and its collision mesh in the body frame.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub name: String,
    pub mesh: TriangleMeshData,
}

/// The set of bodies under estimation, excluding the world.
#[derive(Debug, Clone)]
pub struct RigidBodySet {
    bodies: Vec<RigidBody>,
}

impl RigidBodySet {
    /// Build the body set and the ground-truth state vector from config.
    pub fn from_config(config: &ModelSetConfig) -> Result<(Self, DVector<f64>), ModelConfigError> {
        if config.models.is_empty() {
            return Err(ModelConfigError::NoModels);
        }

        let mut bodies = Vec::with_capacity(config.models.len());
        let mut q_gt = DVector::zeros(6 * config.models.len());
        for (i, entry) in config.models.iter().enumerate() {
            let mesh = entry.geometry.to_mesh();
            if mesh.triangles.is_empty() {
                return Err(ModelConfigError::EmptyMesh {
                    name: entry.name.clone(),
                });
            }
            let state = entry.state_rpy()?;
            for (k, v) in state.iter().enumerate() {
                q_gt[6 * i + k] = *v;
            }
            bodies.push(RigidBody {
                name: entry.name.clone(),
                mesh,
            });
        }
        Ok((Self { bodies }, q_gt))
    }

    /// Number of estimated bodies (the world is not counted).
    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    /// Dimension of the generalized-coordinate vector.
    pub fn num_positions(&self) -> usize {
        6 * self.bodies.len()
    }

    pub fn body(&self, body_id: usize) -> &RigidBody {
        &self.bodies[body_id - 1]
    }

    pub fn bodies(&self) -> &[RigidBody] {
        &self.bodies
    }

    pub fn body_meshes(&self) -> Vec<TriangleMeshData> {
        self.bodies.iter().map(|b| b.mesh.clone()).collect()
    }

    /// World pose of body `body_id` (1-based) under state `q`.
    pub fn body_pose(&self, q: &DVector<f64>, body_id: usize) -> Isometry3<f64> {
        let o = 6 * (body_id - 1);
        let translation = Translation3::new(q[o], q[o + 1], q[o + 2]);
        let rotation = Rotation3::from_euler_angles(q[o + 3], q[o + 4], q[o + 5]);
        Isometry3::from_parts(translation, rotation.into())
    }

    /// World poses of all bodies, indexed by `body_id - 1`.
    pub fn body_poses(&self, q: &DVector<f64>) -> Vec<Isometry3<f64>> {
        (1..=self.num_bodies()).map(|b| self.body_pose(q, b)).collect()
    }

    /// Pack per-body world poses back into a generalized-coordinate vector.
    pub fn poses_to_state(&self, poses: &[Isometry3<f64>]) -> DVector<f64> {
        let mut q = DVector::zeros(self.num_positions());
        for (i, tf) in poses.iter().enumerate() {
            let o = 6 * i;
            q[o] = tf.translation.x;
            q[o + 1] = tf.translation.y;
            q[o + 2] = tf.translation.z;
            let (roll, pitch, yaw) = tf.rotation.euler_angles();
            q[o + 3] = roll;
            q[o + 4] = pitch;
            q[o + 5] = yaw;
        }
        q
    }

    /// Jacobian of the world position of body-frame point `p` with respect
    /// to the hosting body's own six coordinates.
    ///
    /// Columns are ordered `[x, y, z, roll, pitch, yaw]`; the caller places
    /// the block into the full `3 × 6B` Jacobian.
    pub fn point_jacobian_block(
        &self,
        q: &DVector<f64>,
        body_id: usize,
        p: &Vector3<f64>,
    ) -> Matrix3x6<f64> {
        let o = 6 * (body_id - 1);
        let (_, partials) = rotation_and_partials(q[o + 3], q[o + 4], q[o + 5]);

        let mut jac = Matrix3x6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::identity());
        for (k, dr) in partials.iter().enumerate() {
            jac.set_column(3 + k, &(dr * p));
        }
        jac
    }
}

/// The rpy rotation `Rz(yaw)·Ry(pitch)·Rx(roll)` and its three partial
/// derivatives, from precomputed sine/cosine products.
fn rotation_and_partials(roll: f64, pitch: f64, yaw: f64) -> (Matrix3<f64>, [Matrix3<f64>; 3]) {
    let (sr, cr) = roll.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();

    let rx = Matrix3::new(1.0, 0.0, 0.0, 0.0, cr, -sr, 0.0, sr, cr);
    let ry = Matrix3::new(cp, 0.0, sp, 0.0, 1.0, 0.0, -sp, 0.0, cp);
    let rz = Matrix3::new(cy, -sy, 0.0, sy, cy, 0.0, 0.0, 0.0, 1.0);

    let drx = Matrix3::new(0.0, 0.0, 0.0, 0.0, -sr, -cr, 0.0, cr, -sr);
    let dry = Matrix3::new(-sp, 0.0, cp, 0.0, 0.0, 0.0, -cp, 0.0, -sp);
    let drz = Matrix3::new(-sy, -cy, 0.0, cy, -sy, 0.0, 0.0, 0.0, 0.0);

    let rotation = rz * ry * rx;
    let d_roll = rz * ry * drx;
    let d_pitch = rz * dry * rx;
    let d_yaw = drz * ry * rx;
    (rotation, [d_roll, d_pitch, d_yaw])
}

#[cfg(test)]
mod tests {
    use super::config::{GeometrySpec, ModelEntry};
    use super::*;
    use approx::assert_relative_eq;

    fn two_cube_set() -> (RigidBodySet, DVector<f64>) {
        let config = ModelSetConfig {
            models: vec![
                ModelEntry {
                    name: "a".into(),
                    geometry: GeometrySpec::Box {
                        size: [1.0, 1.0, 1.0],
                    },
                    q0: vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                },
                ModelEntry {
                    name: "b".into(),
                    geometry: GeometrySpec::Box {
                        size: [1.0, 1.0, 1.0],
                    },
                    q0: vec![1.0, 2.0, 3.0, 0.0, 0.0, std::f64::consts::FRAC_PI_2],
                },
            ],
        };
        RigidBodySet::from_config(&config).unwrap()
    }

    #[test]
    fn test_from_config_dimensions() {
        let (set, q_gt) = two_cube_set();
        assert_eq!(set.num_bodies(), 2);
        assert_eq!(set.num_positions(), 12);
        assert_eq!(q_gt.len(), 12);
        assert_relative_eq!(q_gt[6], 1.0);
        assert_relative_eq!(q_gt[11], std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn test_body_pose_matches_state() {
        let (set, q_gt) = two_cube_set();
        let tf = set.body_pose(&q_gt, 2);
        assert_relative_eq!(tf.translation.x, 1.0);
        // 90 degrees about z maps +x to +y.
        let mapped = tf.transform_vector(&Vector3::x());
        assert_relative_eq!(mapped.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_state_pose_round_trip() {
        let (set, _) = two_cube_set();
        let mut q = DVector::zeros(12);
        q[0] = 0.3;
        q[4] = 0.2;
        q[7] = -1.0;
        q[9] = 0.4;
        q[10] = -0.3;
        q[11] = 1.1;

        let poses = set.body_poses(&q);
        let back = set.poses_to_state(&poses);
        for i in 0..12 {
            assert_relative_eq!(back[i], q[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_point_jacobian_matches_finite_differences() {
        let (set, _) = two_cube_set();
        let mut q = DVector::zeros(12);
        q[3] = 0.3;
        q[4] = -0.5;
        q[5] = 0.9;
        let p = Vector3::new(0.2, -0.4, 0.6);

        let jac = set.point_jacobian_block(&q, 1, &p);

        let h = 1e-7;
        for col in 0..6 {
            let mut q_plus = q.clone();
            q_plus[col] += h;
            let f_plus = set.body_pose(&q_plus, 1) * nalgebra::Point3::from(p);
            let f = set.body_pose(&q, 1) * nalgebra::Point3::from(p);
            let fd = (f_plus - f) / h;
            for row in 0..3 {
                assert_relative_eq!(jac[(row, col)], fd[row], epsilon = 1e-5);
            }
        }
    }
}
