//! Damped Gauss-Newton point-to-plane ICP and the background worker that
//! turns solver states into branch-and-bound heuristics.
//!
//! The worker owns nothing of the solve: it reads a LIFO seed stack fed by
//! the solver callbacks (freshest candidate first), refines each seed, and
//! pushes near-best results onto a FIFO heuristic queue the node callback
//! drains. Both queues carry their own mutex; the worker polls an
//! estimator-owned done flag and is joined at solve end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nalgebra::{DMatrix, DVector, Matrix3xX, Vector3, Vector6};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::estimator::initial_guess::GuessBuilder;
use crate::geometry::{exact_collision_detect, MeshBank};
use crate::model::RigidBodySet;
use crate::program::SolutionHint;
use crate::solution::unix_time_now;
use crate::viz::VizPublisher;

/// Point-to-plane is the only reachable branch; the point-to-point path is
/// kept compilable behind this switch.
const POINT_TO_PLANE: bool = true;

/// Knobs for one refinement pass.
#[derive(Debug, Clone)]
pub struct IcpOptions {
    /// Weight of the quadratic prior pulling toward the current state.
    pub prior_weight: f64,
    pub max_iters: usize,
    /// Points farther than this proportion of the per-body mean distance
    /// are discarded; nonpositive disables the gate.
    pub rejection_proportion: f64,
    /// Saturation distance of the exact objective.
    pub phi_max: f64,
}

impl Default for IcpOptions {
    fn default() -> Self {
        Self {
            prior_weight: 1.0,
            max_iters: 1000,
            rejection_proportion: 0.0,
            phi_max: 0.1,
        }
    }
}

/// Result of one refinement pass.
#[derive(Debug, Clone)]
pub struct IcpRefinement {
    pub q: DVector<f64>,
    /// Exact collision objective `Σ min(φ_max, ‖s − x‖₁)` at the refined
    /// state.
    pub objective: f64,
    pub iterations: usize,
}

/// Run at most `max_iters` damped Gauss-Newton point-to-plane iterations
/// from `q0`.
pub fn refine_state(
    robot: &RigidBodySet,
    mesh: &MeshBank,
    scene: &Matrix3xX<f64>,
    q0: &DVector<f64>,
    options: &IcpOptions,
    viz: &dyn VizPublisher,
) -> IcpRefinement {
    let nq = robot.num_positions();
    let num_scene = scene.ncols();
    let mut q = q0.clone();

    let mut consecutive_nondecreasing = 0usize;
    let mut last_error = num_scene as f64 * options.phi_max;
    let mut last_published = unix_time_now() - 100.0;
    let mut iterations = 0usize;

    for _ in 0..options.max_iters {
        iterations += 1;
        let poses = robot.body_poses(&q);
        let projection = exact_collision_detect(mesh, &poses, scene);

        let error = projection.phi.sum();
        if error == 0.0 {
            // Either perfect or lost; no gradient information left.
            break;
        } else if error > last_error - 1e-4 {
            consecutive_nondecreasing += 1;
            if consecutive_nondecreasing > 10 {
                break;
            }
        } else {
            consecutive_nondecreasing = 0;
        }
        last_error = error;

        // 0.5 xᵀQx + fᵀx with a prior centered on the current state.
        let mut q_mat = DMatrix::<f64>::identity(nq, nq) * options.prior_weight;
        let mut f_vec = -&q * options.prior_weight;
        let mut residual_mass = 2.0 * options.prior_weight * q.dot(&q);

        for body_id in 1..=robot.num_bodies() {
            let assigned: Vec<usize> = (0..num_scene)
                .filter(|&j| projection.body_idx[j] == body_id)
                .collect();
            if assigned.is_empty() {
                continue;
            }
            for &j in &assigned {
                if scene[(0, j)] == 0.0 {
                    debug!(index = j, body_id, "Scene point at origin entering ICP");
                }
            }

            let mean_dist = assigned
                .iter()
                .map(|&j| (scene.column(j) - projection.world_closest.column(j)).norm())
                .sum::<f64>()
                / assigned.len() as f64;

            let kept: Vec<usize> = assigned
                .into_iter()
                .filter(|&j| {
                    options.rejection_proportion <= 0.0
                        || (scene.column(j) - projection.world_closest.column(j)).norm()
                            <= mean_dist * options.rejection_proportion
                })
                .collect();
            if kept.is_empty() {
                continue;
            }
            let weight = 2.0 / kept.len() as f64;
            let offset = 6 * (body_id - 1);
            let q_body = Vector6::from_fn(|r, _| q[offset + r]);

            for &j in &kept {
                let body_point: Vector3<f64> = projection.body_closest.column(j).into();
                let jac = robot.point_jacobian_block(&q, body_id, &body_point);
                let s: Vector3<f64> = scene.column(j).into();
                let x: Vector3<f64> = projection.world_closest.column(j).into();
                // K = (z − z′) + J·q, the linearization offset.
                let ks = (s - x) + jac * q_body;

                if POINT_TO_PLANE {
                    let n: Vector3<f64> = projection.normals.column(j).into();
                    let ntj = n.transpose() * jac; // 1×6
                    let ntk = n.dot(&ks);
                    for c in 0..6 {
                        f_vec[offset + c] -= weight * ntk * ntj[(0, c)];
                        for r in 0..6 {
                            q_mat[(offset + r, offset + c)] +=
                                weight * ntj[(0, r)] * ntj[(0, c)];
                        }
                    }
                } else {
                    let jtk = jac.transpose() * ks;
                    let jtj = jac.transpose() * jac;
                    for c in 0..6 {
                        f_vec[offset + c] -= weight * jtk[c];
                        for r in 0..6 {
                            q_mat[(offset + r, offset + c)] += weight * jtj[(r, c)];
                        }
                    }
                }
                residual_mass += ks.norm_squared() / kept.len() as f64;
            }
        }

        if residual_mass.abs() > 0.0 {
            // Drop coordinates that never enter, then solve the reduced
            // normal equations by column-pivoted QR.
            let used: Vec<usize> = (0..nq)
                .filter(|&i| {
                    !(f_vec[i].abs() <= 1e-10
                        && q_mat.row(i).norm() <= 1e-10
                        && q_mat.column(i).norm() <= 1e-10)
                })
                .collect();

            if !used.is_empty() {
                let reduced_q =
                    DMatrix::from_fn(used.len(), used.len(), |r, c| q_mat[(used[r], used[c])]);
                let reduced_f = DVector::from_fn(used.len(), |r, _| f_vec[used[r]]);

                let Some(solution) = reduced_q.col_piv_qr().solve(&(-reduced_f)) else {
                    break;
                };
                if solution.iter().any(|v| !v.is_finite()) {
                    break;
                }
                for (r, &i) in used.iter().enumerate() {
                    q[i] = solution[r];
                }
            }
        }

        let now = unix_time_now();
        if now - last_published > 0.01 && q.dot(&q) < 100.0 {
            viz.publish_state(&["mip", "icp", "icp_rbt"], &q, [0.5, 0.2, 0.2, 0.5]);
            last_published = now;
        }
    }

    // Exact saturated objective at the refined state.
    let poses = robot.body_poses(&q);
    let projection = exact_collision_detect(mesh, &poses, scene);
    let objective = (0..num_scene)
        .map(|i| projection.phi[i].min(options.phi_max))
        .sum();

    if q.dot(&q) < 100.0 {
        viz.publish_state(&["mip", "icp", "icp_rbt"], &q, [0.5, 0.2, 0.2, 0.5]);
    }

    IcpRefinement {
        q,
        objective,
        iterations,
    }
}

/// State shared between the solver callbacks and the ICP worker.
pub struct SharedSearchState {
    /// LIFO stack of seed states; the freshest solver candidate is tried
    /// first.
    seeds: Mutex<Vec<DVector<f64>>>,
    /// FIFO queue of heuristic packets for the node callback.
    heuristics: Mutex<VecDeque<SolutionHint>>,
    pub done: AtomicBool,
}

impl SharedSearchState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seeds: Mutex::new(Vec::new()),
            heuristics: Mutex::new(VecDeque::new()),
            done: AtomicBool::new(false),
        })
    }

    pub fn push_seed(&self, q: DVector<f64>) {
        self.seeds.lock().push(q);
    }

    /// Push only when the stack is idle, the node callback's policy.
    pub fn push_seed_if_empty(&self, q: DVector<f64>) {
        let mut seeds = self.seeds.lock();
        if seeds.is_empty() {
            seeds.push(q);
        }
    }

    pub fn pop_seed(&self) -> Option<DVector<f64>> {
        self.seeds.lock().pop()
    }

    pub fn push_heuristic(&self, hint: SolutionHint) {
        self.heuristics.lock().push_back(hint);
    }

    pub fn pop_heuristic(&self) -> Option<SolutionHint> {
        self.heuristics.lock().pop_front()
    }
}

/// Read-only inputs the worker thread owns while the solve runs.
pub struct IcpContext {
    pub robot: RigidBodySet,
    pub mesh: MeshBank,
    pub scene: Matrix3xX<f64>,
    pub options: IcpOptions,
    pub guess: GuessBuilder,
    pub viz: Arc<dyn VizPublisher>,
}

/// Handle to the background refinement thread.
pub struct IcpWorker {
    handle: Option<JoinHandle<()>>,
    shared: Arc<SharedSearchState>,
}

impl IcpWorker {
    pub fn spawn(context: IcpContext, shared: Arc<SharedSearchState>) -> Self {
        shared.done.store(false, Ordering::Relaxed);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || worker_loop(context, thread_shared));
        Self {
            handle: Some(handle),
            shared,
        }
    }

    /// Signal shutdown and wait for the thread.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.done.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IcpWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(context: IcpContext, shared: Arc<SharedSearchState>) {
    let mut best_heuristic = f64::INFINITY;
    debug!("ICP worker started");

    while !shared.done.load(Ordering::Relaxed) {
        if let Some(seed) = shared.pop_seed() {
            if seed.len() != context.robot.num_positions() {
                warn!(
                    got = seed.len(),
                    need = context.robot.num_positions(),
                    "ICP seed has the wrong dimension"
                );
            } else {
                let refinement = refine_state(
                    &context.robot,
                    &context.mesh,
                    &context.scene,
                    &seed,
                    &context.options,
                    context.viz.as_ref(),
                );
                if refinement.objective < best_heuristic * 1.1 {
                    debug!(
                        objective = refinement.objective,
                        iterations = refinement.iterations,
                        "ICP produced a near-best heuristic"
                    );
                    best_heuristic = refinement.objective;
                    shared.push_heuristic(context.guess.from_state(&refinement.q));
                }
            }
        }

        // One second between passes, sliced so shutdown stays prompt.
        for _ in 0..20 {
            if shared.done.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    debug!("ICP worker stopped");
}
