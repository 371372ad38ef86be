//! Warm-start construction: turning a generalized-coordinate state into a
//! (variables, values) pair the solver can complete.
//!
//! Used twice: for the corrupted-ground-truth initial guess, and by the
//! ICP worker to package refined states as branch-and-bound heuristics.

use nalgebra::{DMatrix, DVector, Matrix3xX};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::estimator::params::DetectorType;
use crate::estimator::transform_vars::BodyTransformVars;
use crate::geometry::{closest_point_on_triangle, exact_collision_detect, MeshBank};
use crate::model::RigidBodySet;
use crate::program::{SolutionHint, VarBlock, VarId};

/// Everything needed to back-solve assignments for a given state. Cloned
/// into the ICP worker, so it owns its data.
#[derive(Debug, Clone)]
pub struct GuessBuilder {
    pub detector_type: DetectorType,
    pub allow_outliers: bool,
    pub phi_max: f64,
    pub transforms: Vec<BodyTransformVars>,
    pub correspondence: VarBlock,
    pub faces: Option<VarBlock>,
    pub outliers: Option<VarBlock>,
    pub mesh: MeshBank,
    pub model_points: Matrix3xX<f64>,
    pub body_membership: DMatrix<f64>,
    pub scene: Matrix3xX<f64>,
    pub robot: RigidBodySet,
}

impl GuessBuilder {
    /// Build the hint for state `q`: transform values for every body, plus
    /// formulation-specific assignment values.
    pub fn from_state(&self, q: &DVector<f64>) -> SolutionHint {
        let mut vars: Vec<VarId> = Vec::new();
        let mut vals: Vec<f64> = Vec::new();

        for (b, tf_vars) in self.transforms.iter().enumerate() {
            let pose = self.robot.body_pose(q, b + 1);
            let tf = if self.detector_type == DetectorType::BodyToWorld {
                pose
            } else {
                pose.inverse()
            };
            let rot = tf.rotation.to_rotation_matrix().into_inner();

            for k in 0..3 {
                vars.push(tf_vars.translation[k]);
                vals.push(tf.translation.vector[k]);
            }
            for i in 0..3 {
                for j in 0..3 {
                    vars.push(tf_vars.rotation[i][j]);
                    vals.push(rot[(i, j)]);
                }
            }

            // Threshold indicators follow directly from the rotation.
            if let Some(indicators) = &tf_vars.indicators {
                let k_levels = indicators.positive.len() as f64;
                for (step, (pos, neg)) in indicators
                    .positive
                    .iter()
                    .zip(indicators.negative.iter())
                    .enumerate()
                {
                    let threshold = step as f64 / k_levels;
                    for i in 0..3 {
                        for j in 0..3 {
                            vars.push(pos[i][j]);
                            vals.push(if rot[(i, j)] >= threshold { 1.0 } else { 0.0 });
                            vars.push(neg[i][j]);
                            vals.push(if rot[(i, j)] <= -threshold { 1.0 } else { 0.0 });
                        }
                    }
                }
            }
        }

        match self.detector_type {
            DetectorType::WorldToBody => self.fill_face_assignments(q, &mut vars, &mut vals),
            DetectorType::WorldToBodySampledModelPoints => {
                self.fill_point_assignments(q, &mut vars, &mut vals)
            }
            DetectorType::BodyToWorld => {
                debug!("Initial guess only sets transform variables for body-to-world");
            }
        }

        SolutionHint { vars, vals }
    }

    /// Project every scene point onto the posed model, restricted to the
    /// faces of the body the exact query selected, and assign that face
    /// (or the outlier slot when the distance exceeds φ_max).
    fn fill_face_assignments(&self, q: &DVector<f64>, vars: &mut Vec<VarId>, vals: &mut Vec<f64>) {
        let (Some(faces), Some(outliers)) = (&self.faces, &self.outliers) else {
            return;
        };
        let poses = self.robot.body_poses(q);
        let projection = exact_collision_detect(&self.mesh, &poses, &self.scene);

        for i in 0..self.scene.ncols() {
            let mut best_face = 0usize;
            let mut best_dist = f64::INFINITY;
            if projection.phi[i].is_finite() {
                let body = projection.body_idx[i];
                let tf = &poses[body - 1];
                let scene_pt = self.scene.column(i).into();
                for face in 0..self.mesh.num_faces() {
                    if self.body_membership[(body - 1, face)] < 0.5 {
                        continue;
                    }
                    let [v0, v1, v2] = self.mesh.face_vertices(face);
                    let closest = closest_point_on_triangle(
                        &tf.transform_point(&v0.into()).coords,
                        &tf.transform_point(&v1.into()).coords,
                        &tf.transform_point(&v2.into()).coords,
                        &scene_pt,
                    );
                    let dist = (closest - scene_pt).abs().sum();
                    if dist < best_dist {
                        best_dist = dist;
                        best_face = face;
                    }
                }
            }

            let is_outlier = self.allow_outliers && best_dist >= self.phi_max;
            for face in 0..faces.cols() {
                vars.push(faces.at(i, face));
                vals.push(if !is_outlier && face == best_face {
                    1.0
                } else {
                    0.0
                });
            }
            vars.push(outliers.at(i, 0));
            vals.push(if is_outlier { 1.0 } else { 0.0 });
        }
    }

    /// Assign every scene point to its L1-closest sampled model point, in
    /// the hosting body's frame under the world→body transform.
    fn fill_point_assignments(&self, q: &DVector<f64>, vars: &mut Vec<VarId>, vals: &mut Vec<f64>) {
        let world_to_body: Vec<_> = (1..=self.robot.num_bodies())
            .map(|b| self.robot.body_pose(q, b).inverse())
            .collect();

        for i in 0..self.scene.ncols() {
            let scene_pt: nalgebra::Vector3<f64> = self.scene.column(i).into();
            let mut best_point = None;
            let mut best_dist = f64::INFINITY;
            for m in 0..self.model_points.ncols() {
                let body = (0..self.robot.num_bodies())
                    .find(|&b| self.body_membership[(b, m)] > 0.5)
                    .expect("sampled point without hosting body");
                let local = world_to_body[body] * nalgebra::Point3::from(scene_pt);
                let dist = (local.coords - self.model_points.column(m)).abs().sum();
                if dist < best_dist {
                    best_dist = dist;
                    best_point = Some(m);
                }
            }

            let assign = if !self.allow_outliers || best_dist < self.phi_max {
                best_point
            } else {
                None
            };
            for m in 0..self.correspondence.cols() {
                vars.push(self.correspondence.at(i, m));
                vals.push(if Some(m) == assign { 1.0 } else { 0.0 });
            }
        }
    }
}

/// Uniformly corrupt the ground-truth state by ±`corruption` per
/// coordinate.
pub fn corrupt_state(q_gt: &DVector<f64>, corruption: f64, seed: i64) -> DVector<f64> {
    let mut rng = if seed < 0 {
        StdRng::from_entropy()
    } else {
        StdRng::seed_from_u64(seed as u64)
    };
    let mut q = q_gt.clone();
    for v in q.iter_mut() {
        *v += rng.gen_range(-corruption..=corruption);
    }
    q
}
