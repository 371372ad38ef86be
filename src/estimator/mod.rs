//! The mixed-integer mesh pose estimator.
//!
//! Construction ingests the two config trees and builds the immutable
//! model-side data (body set, mesh bank, ground-truth state). Each
//! `estimate_poses` call preprocesses the scene, assembles the configured
//! MI formulation, drives the solver with the callback handler and the
//! optional ICP worker, and extracts rigid transforms plus correspondences
//! from the final state or the incumbent.

pub mod assembly;
pub mod body_to_world;
pub mod callbacks;
pub mod initial_guess;
pub mod params;
pub mod recon;
pub mod sampled_points;
pub mod transform_vars;
pub mod world_to_body;

use std::sync::Arc;

use anyhow::{Context, Result};
use nalgebra::{DMatrix, DVector, Isometry3, Matrix3, Matrix3xX, Vector3};
use tracing::{debug, info, warn};

use crate::estimator::assembly::Assembled;
use crate::estimator::callbacks::{IncumbentState, SolveEventHandler};
use crate::estimator::initial_guess::{corrupt_state, GuessBuilder};
use crate::estimator::params::{DetectorParams, DetectorType};
use crate::estimator::recon::AffineEstimate;
use crate::estimator::transform_vars::BodyTransformVars;
use crate::geometry::MeshBank;
use crate::icp::{IcpContext, IcpOptions, IcpWorker, SharedSearchState};
use crate::model::config::ModelSetConfig;
use crate::model::RigidBodySet;
use crate::preprocess::preprocess_scene;
use crate::program::{BranchBoundSolver, MipResult};
use crate::solution::{Solution, SolveHistoryElem};
use crate::viz::{NullViz, VizPublisher};

/// Estimates the 6-dof pose of mesh-described rigid bodies from a partial
/// scene cloud by mixed-integer optimization.
pub struct MipMeshPoseEstimator {
    params: DetectorParams,
    robot: RigidBodySet,
    q_gt: DVector<f64>,
    mesh: MeshBank,
    viz: Arc<dyn VizPublisher>,
    solve_history: Vec<SolveHistoryElem>,
}

impl MipMeshPoseEstimator {
    /// Build the estimator from the detector and model config trees.
    pub fn new(params: DetectorParams, model_config: &ModelSetConfig) -> Result<Self> {
        Self::with_viz(params, model_config, Arc::new(NullViz))
    }

    /// Same, with an observability sink for intermediate states.
    pub fn with_viz(
        params: DetectorParams,
        model_config: &ModelSetConfig,
        viz: Arc<dyn VizPublisher>,
    ) -> Result<Self> {
        params
            .rotation_mode()
            .context("invalid detector configuration")?;
        let (robot, q_gt) =
            RigidBodySet::from_config(model_config).context("invalid model configuration")?;
        let mesh = MeshBank::from_body_meshes(&robot.body_meshes())?;
        Ok(Self {
            params,
            robot,
            q_gt,
            mesh,
            viz,
            solve_history: Vec::new(),
        })
    }

    pub fn robot(&self) -> &RigidBodySet {
        &self.robot
    }

    pub fn mesh(&self) -> &MeshBank {
        &self.mesh
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Append-only progress record across all solves of this estimator.
    pub fn solve_history(&self) -> &[SolveHistoryElem] {
        &self.solve_history
    }

    pub fn detail_name(&self) -> String {
        self.params.detail_name()
    }

    /// Estimate poses for the given scene cloud.
    pub fn estimate_poses(&mut self, scene_in: &Matrix3xX<f64>) -> Result<Vec<Solution>> {
        let scene = preprocess_scene(scene_in, &self.params.preprocess_options());
        self.viz.publish_point_cloud(
            &["mip", "scene_pts_downsampled"],
            &scene,
            &vec![[0.1, 1.0, 0.1]; scene.ncols()],
        );

        if scene.ncols() == 0 {
            info!("Empty scene; returning trivial solution");
            return Ok(vec![Solution {
                pose_estimates: Vec::new(),
                objective: 0.0,
                lower_bound: 0.0,
                solve_time: 0.0,
            }]);
        }

        match self.params.detector_type {
            DetectorType::WorldToBody => self.solve_world_to_body(&scene),
            DetectorType::WorldToBodySampledModelPoints => self.solve_sampled_points(&scene),
            DetectorType::BodyToWorld => self.solve_body_to_world(&scene),
        }
    }

    fn solve_world_to_body(&mut self, scene: &Matrix3xX<f64>) -> Result<Vec<Solution>> {
        let assembled =
            world_to_body::build(&self.params, &self.robot, &self.q_gt, &self.mesh, scene)?;
        let (result, incumbent, history, elapsed) = self.run_solve(&assembled, scene);
        self.solve_history.extend(history);

        let solution = if result.status.is_solution_found() {
            let faces = assembled.vars.faces.as_ref().expect("formulation A has faces");
            let f_est = faces.extract(&result.values);
            let c_est = assembled.vars.correspondence.extract(&result.values);
            let estimates =
                transform_estimates(&assembled.vars.transforms, &result.values, true);
            Solution {
                pose_estimates: world_to_body::extract(
                    &assembled, &self.mesh, scene, &f_est, &c_est, &estimates,
                ),
                objective: result.objective,
                lower_bound: result.lower_bound,
                solve_time: elapsed,
            }
        } else if let Some(inc) = incumbent {
            let f_est = inc
                .faces
                .clone()
                .unwrap_or_else(|| DMatrix::zeros(scene.ncols(), self.mesh.num_faces()));
            let estimates = incumbent_estimates(&inc.tfs, true);
            Solution {
                pose_estimates: world_to_body::extract(
                    &assembled,
                    &self.mesh,
                    scene,
                    &f_est,
                    &inc.correspondence,
                    &estimates,
                ),
                objective: inc.objective,
                lower_bound: result.lower_bound,
                solve_time: elapsed,
            }
        } else {
            empty_solution(&result, elapsed)
        };
        Ok(vec![solution])
    }

    fn solve_sampled_points(&mut self, scene: &Matrix3xX<f64>) -> Result<Vec<Solution>> {
        let assembled =
            sampled_points::build(&self.params, &self.robot, &self.q_gt, &self.mesh, scene)?;
        let (result, incumbent, history, elapsed) = self.run_solve(&assembled, scene);
        self.solve_history.extend(history);

        let solution = if result.status.is_solution_found() {
            let c_est = assembled.vars.correspondence.extract(&result.values);
            let estimates =
                transform_estimates(&assembled.vars.transforms, &result.values, true);
            Solution {
                pose_estimates: sampled_points::extract(&assembled, scene, &c_est, &estimates),
                objective: result.objective,
                lower_bound: result.lower_bound,
                solve_time: elapsed,
            }
        } else if let Some(inc) = incumbent {
            let estimates = incumbent_estimates(&inc.tfs, true);
            Solution {
                pose_estimates: sampled_points::extract(
                    &assembled,
                    scene,
                    &inc.correspondence,
                    &estimates,
                ),
                objective: inc.objective,
                lower_bound: result.lower_bound,
                solve_time: elapsed,
            }
        } else {
            empty_solution(&result, elapsed)
        };
        Ok(vec![solution])
    }

    fn solve_body_to_world(&mut self, scene: &Matrix3xX<f64>) -> Result<Vec<Solution>> {
        let assembled =
            body_to_world::build(&self.params, &self.robot, &self.q_gt, &self.mesh, scene)?;
        let (result, incumbent, history, elapsed) = self.run_solve(&assembled, scene);
        self.solve_history.extend(history);

        let solution = if result.status.is_solution_found() {
            let c_est = assembled.vars.correspondence.extract(&result.values);
            let estimates =
                transform_estimates(&assembled.vars.transforms, &result.values, false);
            Solution {
                pose_estimates: body_to_world::extract(&assembled, scene, &c_est, &estimates),
                objective: result.objective,
                lower_bound: result.lower_bound,
                solve_time: elapsed,
            }
        } else if let Some(inc) = incumbent {
            let estimates = incumbent_estimates(&inc.tfs, false);
            Solution {
                pose_estimates: body_to_world::extract(
                    &assembled,
                    scene,
                    &inc.correspondence,
                    &estimates,
                ),
                objective: inc.objective,
                lower_bound: result.lower_bound,
                solve_time: elapsed,
            }
        } else {
            empty_solution(&result, elapsed)
        };
        Ok(vec![solution])
    }

    /// Drive the solver with callbacks and the optional ICP worker.
    fn run_solve(
        &self,
        assembled: &Assembled,
        scene: &Matrix3xX<f64>,
    ) -> (MipResult, Option<IncumbentState>, Vec<SolveHistoryElem>, f64) {
        let options = self.params.solver_options();

        let guess_builder = GuessBuilder {
            detector_type: self.params.detector_type,
            allow_outliers: self.params.allow_outliers,
            phi_max: self.params.phi_max,
            transforms: assembled.vars.transforms.clone(),
            correspondence: assembled.vars.correspondence.clone(),
            faces: assembled.vars.faces.clone(),
            outliers: assembled.vars.outliers.clone(),
            mesh: self.mesh.clone(),
            model_points: assembled.model_points.clone(),
            body_membership: assembled.body_membership.clone(),
            scene: scene.clone(),
            robot: self.robot.clone(),
        };

        let initial_hint = if self.params.use_initial_guess {
            let q_corrupt = corrupt_state(
                &self.q_gt,
                self.params.corruption_amount,
                self.params.init_guess_rand_seed,
            );
            debug!(norm = q_corrupt.norm(), "Seeding solver from corrupted state");
            Some(guess_builder.from_state(&q_corrupt))
        } else {
            None
        };

        let shared = SharedSearchState::new();
        let worker = if self.params.icp_use_as_heuristic {
            Some(IcpWorker::spawn(
                IcpContext {
                    robot: self.robot.clone(),
                    mesh: self.mesh.clone(),
                    scene: scene.clone(),
                    options: IcpOptions {
                        prior_weight: self.params.icp_prior_weight,
                        max_iters: self.params.icp_max_iters,
                        rejection_proportion: self.params.icp_outlier_rejection_proportion,
                        phi_max: self.params.phi_max,
                    },
                    guess: guess_builder,
                    viz: Arc::clone(&self.viz),
                },
                Arc::clone(&shared),
            ))
        } else {
            None
        };

        let mut handler = SolveEventHandler::new(
            self.params.detector_type,
            self.params.icp_use_as_heuristic,
            &self.mesh,
            scene,
            &assembled.vars,
            Arc::clone(&shared),
            Arc::clone(&self.viz),
        );

        let result =
            BranchBoundSolver::new(options).solve(&assembled.program, initial_hint.as_ref(), &mut handler);

        shared.done.store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(worker) = worker {
            worker.finish();
        }

        info!(
            status = ?result.status,
            scene_points = scene.ncols(),
            elapsed = result.runtime,
            "Pose estimation solve finished"
        );
        if let Some(inc) = &handler.incumbent {
            self.viz
                .publish_state(&["mip", "final_pose"], &inc.q, [0.2, 0.9, 0.2, 0.8]);
        }

        let elapsed = result.runtime;
        (result, handler.incumbent.take(), std::mem::take(&mut handler.history), elapsed)
    }
}

fn empty_solution(result: &MipResult, elapsed: f64) -> Solution {
    Solution {
        pose_estimates: Vec::new(),
        objective: f64::INFINITY,
        lower_bound: result.lower_bound,
        solve_time: elapsed,
    }
}

/// Per-body `(R_fit, T_fit, est_tf)` from solver values. `invert` flips
/// world→body parameterizations into body-in-world estimates.
fn transform_estimates(
    transforms: &[BodyTransformVars],
    values: &[f64],
    invert: bool,
) -> Vec<(Matrix3<f64>, Vector3<f64>, Isometry3<f64>)> {
    transforms
        .iter()
        .map(|tf| {
            let raw = AffineEstimate::from_values(tf, values);
            let est_tf = if invert {
                match raw.inverse() {
                    Some(inv) => inv.to_isometry(),
                    None => {
                        warn!("Singular transform estimate; falling back to identity");
                        Isometry3::identity()
                    }
                }
            } else {
                raw.to_isometry()
            };
            (raw.r, raw.t, est_tf)
        })
        .collect()
}

/// The same triple from incumbent transforms, which are already stored
/// body-in-world.
fn incumbent_estimates(
    tfs: &[AffineEstimate],
    invert: bool,
) -> Vec<(Matrix3<f64>, Vector3<f64>, Isometry3<f64>)> {
    tfs.iter()
        .map(|tf| {
            let raw = if invert {
                tf.inverse().unwrap_or_else(|| {
                    warn!("Singular incumbent transform; reporting uninverted values");
                    tf.clone()
                })
            } else {
                tf.clone()
            };
            (raw.r, raw.t, tf.to_isometry())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::surface_area_weighted_sample;
    use crate::program::Sense;
    use crate::test_utils::{
        cube_face_points, single_triangle_config, transform_cloud, unit_cube_config,
    };
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Translation3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixed_rotation_params() -> DetectorParams {
        DetectorParams {
            rotation_constraint: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_face_centroid_reaches_zero_phi() {
        let params = DetectorParams {
            rotation_constraint: 0,
            allow_outliers: false,
            ..Default::default()
        };
        let config = single_triangle_config([0.0; 6]);
        let mut estimator = MipMeshPoseEstimator::new(params, &config).unwrap();

        let centroid = Matrix3xX::from_columns(&[Vector3::new(1.0 / 3.0, 1.0 / 3.0, 0.0)]);
        let solutions = estimator.estimate_poses(&centroid).unwrap();

        assert_eq!(solutions.len(), 1);
        assert!(solutions[0].objective.abs() < 1e-6);
        assert_eq!(solutions[0].pose_estimates.len(), 1);
        let estimate = &solutions[0].pose_estimates[0];
        assert_eq!(estimate.obj_ind, 1);
        assert_eq!(estimate.correspondences.len(), 1);
        assert_eq!(estimate.correspondences[0].scene_ind, 0);
    }

    #[test]
    fn test_world_to_body_recovers_translation() {
        let q0 = [0.3, -0.2, 0.1, 0.0, 0.0, 0.0];
        let config = unit_cube_config(q0);
        let mut estimator =
            MipMeshPoseEstimator::new(fixed_rotation_params(), &config).unwrap();

        let pose = Isometry3::from_parts(
            Translation3::new(q0[0], q0[1], q0[2]),
            Rotation3::identity().into(),
        );
        let scene = transform_cloud(&cube_face_points(), &pose);
        let solutions = estimator.estimate_poses(&scene).unwrap();

        assert!(solutions[0].objective < 1e-5);
        let estimate = &solutions[0].pose_estimates[0];
        for k in 0..3 {
            assert_relative_eq!(
                estimate.est_tf.translation.vector[k],
                pose.translation.vector[k],
                epsilon = 1e-4
            );
        }
        // est_tf maps the model into the scene.
        for corresp in &estimate.correspondences {
            let mapped = estimate.est_tf * nalgebra::Point3::from(corresp.model_pt);
            assert!((mapped.coords - corresp.scene_pt).norm() < 1e-4);
        }
    }

    #[test]
    fn test_outlier_points_classified() {
        let config = unit_cube_config([0.0; 6]);
        let mut estimator =
            MipMeshPoseEstimator::new(fixed_rotation_params(), &config).unwrap();

        let surface = cube_face_points();
        let mut columns: Vec<Vector3<f64>> =
            (0..4).map(|i| surface.column(i).into()).collect();
        columns.push(Vector3::new(3.0, 3.0, 3.0));
        columns.push(Vector3::new(-3.0, 2.0, 1.0));
        let scene = Matrix3xX::from_columns(&columns);

        let solutions = estimator.estimate_poses(&scene).unwrap();
        // Two outliers each cost φ_max, averaged over six points.
        assert_relative_eq!(solutions[0].objective, 2.0 * 0.1 / 6.0, epsilon = 1e-5);

        let assigned: Vec<usize> = solutions[0].pose_estimates[0]
            .correspondences
            .iter()
            .map(|c| c.scene_ind)
            .collect();
        for i in 0..4 {
            assert!(assigned.contains(&i), "surface point {i} lost");
        }
        assert!(!assigned.contains(&4));
        assert!(!assigned.contains(&5));
    }

    #[test]
    fn test_same_face_gate_rows_present_for_far_pairs() {
        let params = DetectorParams {
            rotation_constraint: 0,
            max_dist_to_same_face: 0.0, // auto threshold
            ..Default::default()
        };
        let config = unit_cube_config([0.0; 6]);
        let estimator = MipMeshPoseEstimator::new(params.clone(), &config).unwrap();

        // Two opposite cube corners: separation √3 exceeds the auto
        // threshold √2 + 2·φ_max ≈ 1.61.
        let scene = Matrix3xX::from_columns(&[
            Vector3::new(0.5, 0.5, 0.5),
            Vector3::new(-0.5, -0.5, -0.5),
            Vector3::new(0.5, 0.4, 0.5),
        ]);
        let assembled = world_to_body::build(
            &params,
            &estimator.robot,
            &estimator.q_gt,
            &estimator.mesh,
            &scene,
        )
        .unwrap();

        let faces = assembled.vars.faces.as_ref().unwrap();
        let gate_rows = |a: usize, b: usize| {
            assembled
                .program
                .constraints()
                .iter()
                .filter(|c| {
                    c.sense == Sense::Le
                        && c.rhs == 1.0
                        && c.expr.terms.len() == 2
                        && (0..faces.cols()).any(|face| {
                            c.expr.terms.iter().any(|t| t.0 == faces.at(a, face))
                                && c.expr.terms.iter().any(|t| t.0 == faces.at(b, face))
                        })
                })
                .count()
        };

        // The far pair gets one row per face; the near pair gets none.
        assert_eq!(gate_rows(0, 1), estimator.mesh.num_faces());
        assert_eq!(gate_rows(0, 2), 0);
    }

    #[test]
    fn test_gate_makes_single_face_pair_infeasible() {
        let params = DetectorParams {
            rotation_constraint: 0,
            allow_outliers: false,
            max_dist_to_same_face: 0.5,
            ..Default::default()
        };
        let config = single_triangle_config([0.0; 6]);
        let mut estimator = MipMeshPoseEstimator::new(params, &config).unwrap();

        let scene = Matrix3xX::from_columns(&[
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
        ]);
        let solutions = estimator.estimate_poses(&scene).unwrap();

        assert!(solutions[0].objective.is_infinite());
        assert!(solutions[0].pose_estimates.is_empty());
    }

    #[test]
    fn test_sampled_points_formulation_recovers_translation() {
        let q0 = [0.15, -0.1, 0.2, 0.0, 0.0, 0.0];
        let params = DetectorParams {
            detector_type: DetectorType::WorldToBodySampledModelPoints,
            rotation_constraint: 0,
            model_sample_rays: 4,
            model_point_rand_seed: 7,
            ..Default::default()
        };
        let config = unit_cube_config(q0);
        let mut estimator = MipMeshPoseEstimator::new(params, &config).unwrap();

        // Rebuild the same sampled cloud the formulation will draw and
        // pose it at the ground truth.
        let mut rng = StdRng::seed_from_u64(7);
        let (model_points, _) = surface_area_weighted_sample(estimator.mesh(), 4, &mut rng);
        let pose = Isometry3::from_parts(
            Translation3::new(q0[0], q0[1], q0[2]),
            Rotation3::identity().into(),
        );
        let scene = transform_cloud(&model_points, &pose);

        let solutions = estimator.estimate_poses(&scene).unwrap();
        assert!(solutions[0].objective < 1e-5);
        let estimate = &solutions[0].pose_estimates[0];
        for k in 0..3 {
            assert_relative_eq!(
                estimate.est_tf.translation.vector[k],
                pose.translation.vector[k],
                epsilon = 1e-3
            );
        }
        assert_eq!(estimate.correspondences.len(), 4);
    }

    #[test]
    fn test_body_to_world_direction_symmetry() {
        let q0 = [0.2, 0.1, -0.1, 0.0, 0.0, 0.0];
        let params = DetectorParams {
            detector_type: DetectorType::BodyToWorld,
            rotation_constraint: 0,
            model_sample_rays: 4,
            model_point_rand_seed: 11,
            ..Default::default()
        };
        let config = unit_cube_config(q0);
        let mut estimator = MipMeshPoseEstimator::new(params, &config).unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let (model_points, _) = surface_area_weighted_sample(estimator.mesh(), 4, &mut rng);
        let pose = Isometry3::from_parts(
            Translation3::new(q0[0], q0[1], q0[2]),
            Rotation3::identity().into(),
        );
        let scene = transform_cloud(&model_points, &pose);

        let solutions = estimator.estimate_poses(&scene).unwrap();
        let estimate = &solutions[0].pose_estimates[0];

        // Body-to-world transforms apply to model points directly.
        for corresp in &estimate.correspondences {
            let mapped = estimate.est_tf * nalgebra::Point3::from(corresp.model_pt);
            assert!(
                (mapped.coords - corresp.scene_pt).norm() < 0.02,
                "model point maps {:?} away from its scene point",
                (mapped.coords - corresp.scene_pt).norm()
            );
        }
        for k in 0..3 {
            assert_relative_eq!(
                estimate.est_tf.translation.vector[k],
                pose.translation.vector[k],
                epsilon = 0.02
            );
        }
    }

    #[test]
    fn test_empty_scene_returns_trivially() {
        let config = unit_cube_config([0.0; 6]);
        let mut estimator =
            MipMeshPoseEstimator::new(fixed_rotation_params(), &config).unwrap();

        let scene = Matrix3xX::zeros(0);
        let solutions = estimator.estimate_poses(&scene).unwrap();
        assert_eq!(solutions.len(), 1);
        assert!(solutions[0].pose_estimates.is_empty());
    }

    #[test]
    fn test_solve_history_is_time_ordered() {
        let config = unit_cube_config([0.0; 6]);
        let mut estimator =
            MipMeshPoseEstimator::new(fixed_rotation_params(), &config).unwrap();
        let scene = cube_face_points();
        estimator.estimate_poses(&scene).unwrap();

        let history = estimator.solve_history();
        assert!(!history.is_empty());
        for pair in history.windows(2) {
            assert!(pair[1].wall_time >= pair[0].wall_time);
            assert!(pair[1].explored_node_count >= pair[0].explored_node_count);
        }
    }

    #[test]
    fn test_icp_heuristic_worker_lifecycle() {
        let params = DetectorParams {
            rotation_constraint: 0,
            icp_use_as_heuristic: true,
            icp_max_iters: 10,
            ..Default::default()
        };
        let config = single_triangle_config([0.0; 6]);
        let mut estimator = MipMeshPoseEstimator::new(params, &config).unwrap();

        let centroid = Matrix3xX::from_columns(&[Vector3::new(1.0 / 3.0, 1.0 / 3.0, 0.0)]);
        let solutions = estimator.estimate_poses(&centroid).unwrap();
        assert!(solutions[0].objective < 1e-6);
    }

    #[test]
    fn test_initial_guess_seeds_the_solver() {
        let params = DetectorParams {
            rotation_constraint: 0,
            use_initial_guess: true,
            corruption_amount: 0.05,
            init_guess_rand_seed: 3,
            ..Default::default()
        };
        let config = unit_cube_config([0.0; 6]);
        let mut estimator = MipMeshPoseEstimator::new(params, &config).unwrap();

        let scene = cube_face_points();
        let solutions = estimator.estimate_poses(&scene).unwrap();
        assert!(solutions[0].objective < 1e-5);
        // The seeded incumbent shows up in the feasible-solution count.
        let history = estimator.solve_history();
        assert!(history
            .iter()
            .any(|elem| elem.feasible_solutions_count >= 1));
    }

    /// A clean unit cube with an area-weighted surface cloud and the full
    /// mode-4 rotation envelope.
    #[test]
    #[ignore = "Exhaustive mode-4 branch-and-bound; minutes of runtime"]
    fn test_cube_clean_full_rotation_search() {
        let params = DetectorParams {
            rotation_constraint: 4,
            rotation_constraint_num_faces: 2,
            ..Default::default()
        };
        let config = unit_cube_config([0.0; 6]);
        let mut estimator = MipMeshPoseEstimator::new(params, &config).unwrap();

        let mut rng = StdRng::seed_from_u64(21);
        let (scene, _) = surface_area_weighted_sample(estimator.mesh(), 50, &mut rng);
        let solutions = estimator.estimate_poses(&scene).unwrap();

        let estimate = &solutions[0].pose_estimates[0];
        assert!(estimate.est_tf.translation.vector.norm() < 0.02);
        let r = estimate.est_tf.rotation.to_rotation_matrix();
        let identity_error = (r.into_inner() - Matrix3::identity()).norm();
        assert!(identity_error < 0.05);
    }

    /// The same cube rotated 45° about z and shifted along x.
    #[test]
    #[ignore = "Exhaustive mode-4 branch-and-bound; minutes of runtime"]
    fn test_cube_rotated_full_rotation_search() {
        let params = DetectorParams {
            rotation_constraint: 4,
            rotation_constraint_num_faces: 2,
            ..Default::default()
        };
        let config = unit_cube_config([0.0; 6]);
        let mut estimator = MipMeshPoseEstimator::new(params, &config).unwrap();

        let pose = Isometry3::from_parts(
            Translation3::new(0.1, 0.0, 0.0),
            Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_4).into(),
        );
        let mut rng = StdRng::seed_from_u64(22);
        let (samples, _) = surface_area_weighted_sample(estimator.mesh(), 50, &mut rng);
        let scene = transform_cloud(&samples, &pose);

        let solutions = estimator.estimate_poses(&scene).unwrap();
        let estimate = &solutions[0].pose_estimates[0];
        assert!((estimate.est_tf.translation.vector - pose.translation.vector).norm() < 0.02);
        let diff = estimate.est_tf.rotation.to_rotation_matrix().into_inner()
            - pose.rotation.to_rotation_matrix().into_inner();
        assert!(diff.norm() < 0.05);
    }

    /// Ten uniform box outliers on top of a clean surface cloud.
    #[test]
    #[ignore = "Exhaustive mode-4 branch-and-bound; minutes of runtime"]
    fn test_ten_outliers_mostly_rejected() {
        let params = DetectorParams {
            rotation_constraint: 4,
            rotation_constraint_num_faces: 2,
            allow_outliers: true,
            phi_max: 0.05,
            ..Default::default()
        };
        let config = unit_cube_config([0.0; 6]);
        let mut estimator = MipMeshPoseEstimator::new(params, &config).unwrap();

        let mut rng = StdRng::seed_from_u64(23);
        let (surface, _) = surface_area_weighted_sample(estimator.mesh(), 50, &mut rng);
        let mut columns: Vec<Vector3<f64>> =
            (0..50).map(|i| surface.column(i).into()).collect();
        use rand::Rng;
        for _ in 0..10 {
            columns.push(Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            ));
        }
        let scene = Matrix3xX::from_columns(&columns);

        let solutions = estimator.estimate_poses(&scene).unwrap();
        let assigned: Vec<usize> = solutions[0].pose_estimates[0]
            .correspondences
            .iter()
            .map(|c| c.scene_ind)
            .collect();
        let outliers_rejected = (50..60).filter(|i| !assigned.contains(i)).count();
        assert!(outliers_rejected >= 8, "only {outliers_rejected} rejected");
    }
}
