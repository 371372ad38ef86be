//! The node/solution callback handler driven by the MI solver.
//!
//! One context object owns the mutable solve-side state (incumbent,
//! history, rate limiters) and borrows the read-only inputs, so the two
//! callbacks cannot race each other and nothing is globally shared.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix3xX};
use tracing::{debug, info};

use crate::estimator::assembly::FormulationVars;
use crate::estimator::params::DetectorType;
use crate::estimator::recon::{poses_to_state, reconstruct_poses, AffineEstimate};
use crate::geometry::MeshBank;
use crate::icp::SharedSearchState;
use crate::program::{MipEvents, SolutionHint, SolveStatusInfo};
use crate::solution::{unix_time_now, SolveHistoryElem};
use crate::viz::{publish_error_colored_cloud, VizPublisher};

/// The best integer-feasible state observed during the solve.
#[derive(Debug, Clone)]
pub struct IncumbentState {
    pub objective: f64,
    pub q: DVector<f64>,
    pub correspondence: DMatrix<f64>,
    /// Face assignments, kept for the face-correspondence formulation.
    pub faces: Option<DMatrix<f64>>,
    /// Per-body transforms, already flipped to body-in-world.
    pub tfs: Vec<AffineEstimate>,
}

/// Callback context for one solve.
pub struct SolveEventHandler<'a> {
    detector_type: DetectorType,
    use_icp_heuristic: bool,
    mesh: &'a MeshBank,
    scene: &'a Matrix3xX<f64>,
    vars: &'a FormulationVars,
    shared: Arc<SharedSearchState>,
    viz: Arc<dyn VizPublisher>,

    pub incumbent: Option<IncumbentState>,
    pub history: Vec<SolveHistoryElem>,
    last_published_node: f64,
    last_published_sol: f64,
    best_sol_objective: f64,
}

impl<'a> SolveEventHandler<'a> {
    pub fn new(
        detector_type: DetectorType,
        use_icp_heuristic: bool,
        mesh: &'a MeshBank,
        scene: &'a Matrix3xX<f64>,
        vars: &'a FormulationVars,
        shared: Arc<SharedSearchState>,
        viz: Arc<dyn VizPublisher>,
    ) -> Self {
        Self {
            detector_type,
            use_icp_heuristic,
            mesh,
            scene,
            vars,
            shared,
            viz,
            incumbent: None,
            history: Vec::new(),
            last_published_node: 0.0,
            last_published_sol: 0.0,
            best_sol_objective: f64::INFINITY,
        }
    }

    fn invert_transforms(&self) -> bool {
        self.detector_type != DetectorType::BodyToWorld
    }

    fn history_entry(info: &SolveStatusInfo) -> SolveHistoryElem {
        SolveHistoryElem {
            wall_time: unix_time_now(),
            reported_runtime: info.reported_runtime,
            best_objective: info.best_objective,
            best_bound: info.best_bound,
            explored_node_count: info.explored_node_count,
            feasible_solutions_count: info.feasible_solutions_count,
        }
    }
}

impl MipEvents for SolveEventHandler<'_> {
    fn on_node(&mut self, values: &[f64], info: &SolveStatusInfo) -> Option<SolutionHint> {
        // Relaxed transforms may be arbitrarily far from rigid; anything
        // finite is still a usable ICP seed.
        if let Some(poses) =
            reconstruct_poses(&self.vars.transforms, values, self.invert_transforms())
        {
            let q = poses_to_state(&poses);
            if q.iter().all(|v| v.is_finite()) {
                let now = unix_time_now();
                if now - self.last_published_node > 0.1 && q.dot(&q) < 1000.0 {
                    self.last_published_node = now;
                    self.viz
                        .publish_state(&["mip", "latest_node"], &q, [0.2, 0.2, 1.0, 0.3]);
                }
                if self.use_icp_heuristic {
                    self.shared.push_seed_if_empty(q);
                }
            }
        }

        // Hand a pending ICP heuristic back to the solver. It is most
        // likely unrelated to the current node.
        let hint = if self.use_icp_heuristic {
            self.shared.pop_heuristic()
        } else {
            None
        };

        let due = self
            .history
            .last()
            .map_or(true, |last| unix_time_now() - last.wall_time > 0.1);
        if due {
            self.history.push(Self::history_entry(info));
        }

        hint
    }

    fn on_solution(&mut self, values: &[f64], info: &SolveStatusInfo) {
        if let Some(poses) =
            reconstruct_poses(&self.vars.transforms, values, self.invert_transforms())
        {
            let q = poses_to_state(&poses);

            let now = unix_time_now();
            if now - self.last_published_sol > 0.05 && q.dot(&q) < 100.0 {
                self.last_published_sol = now;
                self.viz
                    .publish_state(&["mip", "latest_sol"], &q, [0.2, 0.5, 1.0, 0.5]);
            }

            if info.current_objective < self.best_sol_objective {
                info!(objective = info.current_objective, "New incumbent solution");
                self.best_sol_objective = info.current_objective;
                self.viz
                    .publish_state(&["mip", "incumbent_sol"], &q, [0.0, 0.8, 0.8, 0.5]);

                let correspondence = self.vars.correspondence.extract(values);
                let faces = if self.detector_type == DetectorType::WorldToBody {
                    self.vars.faces.as_ref().map(|f| f.extract(values))
                } else {
                    None
                };
                let isometries: Vec<_> = poses.iter().map(|p| p.to_isometry()).collect();
                publish_error_colored_cloud(
                    self.viz.as_ref(),
                    self.mesh,
                    &isometries,
                    self.scene,
                    &["mip", "scene_pts_colorized_incumbent"],
                );

                self.incumbent = Some(IncumbentState {
                    objective: info.current_objective,
                    q: q.clone(),
                    correspondence,
                    faces,
                    tfs: poses,
                });
            }

            if self.use_icp_heuristic {
                self.shared.push_seed(q);
            }
        } else {
            debug!("Skipping incumbent with singular transform");
        }

        // Feasible incumbents are rare; record them all.
        self.history.push(Self::history_entry(info));
    }
}
