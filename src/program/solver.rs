//! Depth-first branch-and-bound over the binary variables.
//!
//! Nodes solve the Big-M simplex relaxation; convex quadratic costs are
//! lower-bounded by outer-approximation cuts added lazily at LP solutions,
//! so the LP kernel stays the only solve primitive. Callbacks mirror the
//! node/solution hook pair the estimator drives: node callbacks may return
//! a feasible-solution hint whose binary fixings are completed by an LP.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, warn};

use super::simplex::{solve_relaxation, LpStatus};
use super::{LinConstraint, LinExpr, Program, Sense, VarKind};

/// Options for the bundled solver. Unrecognized pass-through keys are
/// logged and ignored so configs written for other backends still load.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Wall-clock limit in seconds.
    pub time_limit: Option<f64>,
    /// Relative optimality gap at which the search stops.
    pub mip_gap: f64,
    /// Maximum number of explored nodes.
    pub node_limit: Option<usize>,
    /// Integrality tolerance on relaxed binaries.
    pub integrality_tol: f64,
    /// Global cap on outer-approximation cuts for quadratic costs.
    pub max_quad_cuts: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            time_limit: None,
            mip_gap: 1e-6,
            node_limit: None,
            integrality_tol: 1e-6,
            max_quad_cuts: 200,
        }
    }
}

impl SolverOptions {
    pub fn apply_int_options(&mut self, options: &BTreeMap<String, i64>) {
        for (key, value) in options {
            match key.as_str() {
                "NodeLimit" => self.node_limit = Some(*value as usize),
                "TimeLimit" => self.time_limit = Some(*value as f64),
                _ => warn!(key = %key, value, "Ignoring unsupported integer solver option"),
            }
        }
    }

    pub fn apply_float_options(&mut self, options: &BTreeMap<String, f64>) {
        for (key, value) in options {
            match key.as_str() {
                "TimeLimit" => self.time_limit = Some(*value),
                "MIPGap" => self.mip_gap = *value,
                "IntFeasTol" => self.integrality_tol = *value,
                _ => warn!(key = %key, value, "Ignoring unsupported float solver option"),
            }
        }
    }
}

/// Progress snapshot handed to callbacks.
#[derive(Debug, Clone)]
pub struct SolveStatusInfo {
    /// Seconds since the solve started.
    pub reported_runtime: f64,
    /// Objective at the triggering node or candidate solution.
    pub current_objective: f64,
    /// Best integer-feasible objective so far (+∞ if none).
    pub best_objective: f64,
    /// Best proven lower bound so far.
    pub best_bound: f64,
    pub explored_node_count: usize,
    pub feasible_solutions_count: usize,
}

/// A (variables, values) pair suggesting a feasible solution. Only binary
/// entries are acted on: they are fixed and the remainder completed by LP.
#[derive(Debug, Clone)]
pub struct SolutionHint {
    pub vars: Vec<super::VarId>,
    pub vals: Vec<f64>,
}

/// Callback surface invoked from inside the search.
pub trait MipEvents {
    /// Called after each node relaxation solves; `values` holds the relaxed
    /// assignment. May return a solution hint to try immediately.
    fn on_node(&mut self, _values: &[f64], _info: &SolveStatusInfo) -> Option<SolutionHint> {
        None
    }

    /// Called whenever a new integer-feasible incumbent is accepted.
    fn on_solution(&mut self, _values: &[f64], _info: &SolveStatusInfo) {}
}

/// No-op callbacks.
pub struct NoEvents;

impl MipEvents for NoEvents {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipStatus {
    /// Search finished with a proven (gap-) optimal incumbent.
    Optimal,
    /// A limit was hit with an incumbent available.
    Feasible,
    /// The program has no integer-feasible point.
    Infeasible,
    /// A limit was hit before any incumbent was found.
    NoSolution,
}

impl MipStatus {
    pub fn is_solution_found(&self) -> bool {
        matches!(self, MipStatus::Optimal)
    }
}

#[derive(Debug, Clone)]
pub struct MipResult {
    pub status: MipStatus,
    /// Incumbent objective (+∞ if none).
    pub objective: f64,
    /// Proven lower bound on the optimum.
    pub lower_bound: f64,
    /// Incumbent values, one per program variable; empty if none.
    pub values: Vec<f64>,
    pub explored_nodes: usize,
    pub feasible_count: usize,
    pub runtime: f64,
}

struct Node {
    /// Binary fixings (variable index, value) accumulated along the path.
    fixes: Vec<(usize, f64)>,
    /// Parent LP bound; a valid lower bound for the subtree.
    inherited_bound: f64,
}

/// Depth-first branch-and-bound MILP/MIQP solver.
pub struct BranchBoundSolver {
    options: SolverOptions,
}

impl BranchBoundSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn with_defaults() -> Self {
        Self::new(SolverOptions::default())
    }

    /// Run the search. `initial_guess` seeds the incumbent the same way a
    /// node-callback hint would.
    pub fn solve(
        &self,
        program: &Program,
        initial_guess: Option<&SolutionHint>,
        events: &mut dyn MipEvents,
    ) -> MipResult {
        let start = Instant::now();
        let n = program.num_vars();

        // Working copy with epigraph variables for the quadratic costs:
        // cost += weight · t_k, with lazy cuts t_k ≥ linearization(q_k).
        let mut work = program.clone();
        let mut epigraph = Vec::new();
        for (k, quad) in program.quad_costs().iter().enumerate() {
            let t = work.add_continuous(format!("quad_epi[{k}]"), 0.0, f64::INFINITY);
            work.add_linear_cost(LinExpr::term(t, quad.weight));
            epigraph.push(t);
        }
        work.quad_costs.clear();

        let total = work.num_vars();
        let base_lower: Vec<f64> = (0..total).map(|j| work.var_lower(super::VarId(j))).collect();
        let base_upper: Vec<f64> = (0..total).map(|j| work.var_upper(super::VarId(j))).collect();
        let binaries: Vec<usize> = (0..total)
            .filter(|&j| work.var_kind(super::VarId(j)) == VarKind::Binary)
            .collect();

        let mut cuts: Vec<LinConstraint> = Vec::new();
        let mut incumbent_obj = f64::INFINITY;
        let mut incumbent_vals: Vec<f64> = Vec::new();
        let mut explored = 0usize;
        let mut feasible_count = 0usize;

        let mut stack = vec![Node {
            fixes: Vec::new(),
            inherited_bound: f64::NEG_INFINITY,
        }];

        // Seed the incumbent from the caller's guess before searching.
        if let Some(hint) = initial_guess {
            self.try_hint(
                program,
                &work,
                hint,
                &base_lower,
                &base_upper,
                &binaries,
                &mut cuts,
                &epigraph,
                &mut incumbent_obj,
                &mut incumbent_vals,
                &mut feasible_count,
                events,
                start,
                explored,
                f64::NEG_INFINITY,
            );
        }

        let mut limit_hit = false;
        while let Some(node) = stack.pop() {
            if let Some(limit) = self.options.time_limit {
                if start.elapsed().as_secs_f64() > limit {
                    stack.push(node);
                    limit_hit = true;
                    break;
                }
            }
            if let Some(limit) = self.options.node_limit {
                if explored >= limit {
                    stack.push(node);
                    limit_hit = true;
                    break;
                }
            }

            // The parent bound already dominates the incumbent: no LP
            // needed.
            if node.inherited_bound >= incumbent_obj - 1e-9 {
                continue;
            }

            let mut lower = base_lower.clone();
            let mut upper = base_upper.clone();
            for &(j, v) in &node.fixes {
                lower[j] = v;
                upper[j] = v;
            }

            let Some(lp) = self.solve_with_quad_cuts(
                &work,
                program,
                &mut cuts,
                &epigraph,
                &lower,
                &upper,
            ) else {
                continue; // infeasible or unbounded node
            };
            explored += 1;
            let node_bound = lp.objective;

            if node_bound >= incumbent_obj - 1e-9 {
                continue;
            }

            let best_bound = stack
                .iter()
                .map(|nd| nd.inherited_bound)
                .fold(node_bound, f64::min);

            let info = SolveStatusInfo {
                reported_runtime: start.elapsed().as_secs_f64(),
                current_objective: node_bound,
                best_objective: incumbent_obj,
                best_bound,
                explored_node_count: explored,
                feasible_solutions_count: feasible_count,
            };
            if let Some(hint) = events.on_node(&lp.values[..n], &info) {
                self.try_hint(
                    program,
                    &work,
                    &hint,
                    &base_lower,
                    &base_upper,
                    &binaries,
                    &mut cuts,
                    &epigraph,
                    &mut incumbent_obj,
                    &mut incumbent_vals,
                    &mut feasible_count,
                    events,
                    start,
                    explored,
                    best_bound,
                );
                if node_bound >= incumbent_obj - 1e-9 {
                    continue;
                }
            }

            // Branching variable: fractional binary with the highest
            // priority, tie-broken most-fractional.
            let tol = self.options.integrality_tol;
            let mut branch: Option<(usize, f64)> = None;
            for &j in &binaries {
                let v = lp.values[j];
                if (v - v.round()).abs() > tol {
                    match branch {
                        None => branch = Some((j, v)),
                        Some((bj, bv)) => {
                            let pj = work.branch_priority(super::VarId(j));
                            let pb = work.branch_priority(super::VarId(bj));
                            let fj = (lp.values[j] - 0.5).abs();
                            let fb = (bv - 0.5).abs();
                            if pj > pb || (pj == pb && fj < fb) {
                                branch = Some((j, v));
                            }
                        }
                    }
                }
            }

            match branch {
                None => {
                    // Integer feasible: candidate incumbent at the true
                    // (linear + quadratic) objective.
                    let true_obj = program.objective_value(&lp.values[..n]);
                    if true_obj < incumbent_obj - 1e-12 {
                        incumbent_obj = true_obj;
                        incumbent_vals = lp.values[..n].to_vec();
                        feasible_count += 1;
                        let info = SolveStatusInfo {
                            reported_runtime: start.elapsed().as_secs_f64(),
                            current_objective: true_obj,
                            best_objective: incumbent_obj,
                            best_bound,
                            explored_node_count: explored,
                            feasible_solutions_count: feasible_count,
                        };
                        events.on_solution(&incumbent_vals, &info);
                    }
                }
                Some((j, v)) => {
                    let near = v.round().clamp(0.0, 1.0);
                    let far = 1.0 - near;
                    let mut far_fixes = node.fixes.clone();
                    far_fixes.push((j, far));
                    stack.push(Node {
                        fixes: far_fixes,
                        inherited_bound: node_bound,
                    });
                    let mut near_fixes = node.fixes;
                    near_fixes.push((j, near));
                    stack.push(Node {
                        fixes: near_fixes,
                        inherited_bound: node_bound,
                    });
                }
            }

            // Gap termination.
            if incumbent_obj.is_finite() {
                let lb = stack
                    .iter()
                    .map(|nd| nd.inherited_bound)
                    .fold(f64::INFINITY, f64::min);
                if lb.is_finite()
                    && incumbent_obj - lb <= self.options.mip_gap * incumbent_obj.abs().max(1e-10)
                {
                    debug!(incumbent = incumbent_obj, bound = lb, "Gap closed");
                    stack.clear();
                }
            }
        }

        let runtime = start.elapsed().as_secs_f64();
        let (status, lower_bound) = if !limit_hit {
            if incumbent_obj.is_finite() {
                (MipStatus::Optimal, incumbent_obj)
            } else {
                (MipStatus::Infeasible, f64::INFINITY)
            }
        } else {
            let lb = stack
                .iter()
                .map(|nd| nd.inherited_bound)
                .fold(f64::INFINITY, f64::min);
            if incumbent_obj.is_finite() {
                (MipStatus::Feasible, lb.min(incumbent_obj))
            } else {
                (MipStatus::NoSolution, lb)
            }
        };

        debug!(
            ?status,
            objective = incumbent_obj,
            lower_bound,
            explored,
            feasible_count,
            runtime,
            "Branch-and-bound finished"
        );
        MipResult {
            status,
            objective: incumbent_obj,
            lower_bound,
            values: incumbent_vals,
            explored_nodes: explored,
            feasible_count,
            runtime,
        }
    }

    /// LP solve plus the lazy outer-approximation loop for quadratics.
    /// Returns `None` for infeasible or unbounded relaxations.
    fn solve_with_quad_cuts(
        &self,
        work: &Program,
        original: &Program,
        cuts: &mut Vec<LinConstraint>,
        epigraph: &[super::VarId],
        lower: &[f64],
        upper: &[f64],
    ) -> Option<super::simplex::LpOutcome> {
        let mut lp = solve_relaxation(work, cuts, lower, upper);
        if lp.status != LpStatus::Optimal {
            if lp.status == LpStatus::Unbounded {
                warn!("Unbounded LP relaxation; pruning node");
            }
            return None;
        }

        let mut rounds = 0;
        while !epigraph.is_empty() && cuts.len() < self.options.max_quad_cuts && rounds < 30 {
            let mut violated = false;
            for (k, quad) in original.quad_costs().iter().enumerate() {
                let q_hat: f64 = quad
                    .exprs
                    .iter()
                    .map(|e| {
                        let v = e.eval(&lp.values);
                        v * v
                    })
                    .sum();
                let t_val = lp.values[epigraph[k].0];
                if q_hat > t_val + 1e-6 {
                    // t ≥ 2 Σ e(x̂)·e(x) − q̂, the tangent of Σ e² at x̂.
                    let mut expr = LinExpr::var(epigraph[k]);
                    for e in &quad.exprs {
                        let e_hat = e.eval(&lp.values);
                        expr = expr.minus_expr(&e.clone().scaled(2.0 * e_hat));
                    }
                    cuts.push(LinConstraint {
                        expr,
                        sense: Sense::Ge,
                        rhs: -q_hat,
                    });
                    violated = true;
                }
            }
            if !violated {
                break;
            }
            lp = solve_relaxation(work, cuts, lower, upper);
            if lp.status != LpStatus::Optimal {
                return None;
            }
            rounds += 1;
        }

        Some(lp)
    }

    /// Fix the binaries named by a hint and complete the rest by LP. On an
    /// integral, improving completion the incumbent is replaced and the
    /// solution callback fired.
    #[allow(clippy::too_many_arguments)]
    fn try_hint(
        &self,
        program: &Program,
        work: &Program,
        hint: &SolutionHint,
        base_lower: &[f64],
        base_upper: &[f64],
        binaries: &[usize],
        cuts: &mut Vec<LinConstraint>,
        epigraph: &[super::VarId],
        incumbent_obj: &mut f64,
        incumbent_vals: &mut Vec<f64>,
        feasible_count: &mut usize,
        events: &mut dyn MipEvents,
        start: Instant,
        explored: usize,
        best_bound: f64,
    ) {
        let n = program.num_vars();
        let mut lower = base_lower.to_vec();
        let mut upper = base_upper.to_vec();
        for (var, val) in hint.vars.iter().zip(&hint.vals) {
            if work.var_kind(*var) == VarKind::Binary {
                let fixed = val.round().clamp(0.0, 1.0);
                lower[var.0] = fixed;
                upper[var.0] = fixed;
            }
        }

        let Some(lp) =
            self.solve_with_quad_cuts(work, program, cuts, epigraph, &lower, &upper)
        else {
            debug!("Solution hint infeasible; discarded");
            return;
        };
        let tol = self.options.integrality_tol;
        for &j in binaries {
            if (lp.values[j] - lp.values[j].round()).abs() > tol {
                debug!("Solution hint left fractional binaries; discarded");
                return;
            }
        }

        let true_obj = program.objective_value(&lp.values[..n]);
        if true_obj < *incumbent_obj - 1e-12 {
            *incumbent_obj = true_obj;
            *incumbent_vals = lp.values[..n].to_vec();
            *feasible_count += 1;
            let info = SolveStatusInfo {
                reported_runtime: start.elapsed().as_secs_f64(),
                current_objective: true_obj,
                best_objective: *incumbent_obj,
                best_bound,
                explored_node_count: explored,
                feasible_solutions_count: *feasible_count,
            };
            events.on_solution(incumbent_vals, &info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::VarId;
    use approx::assert_relative_eq;

    #[test]
    fn test_knapsack() {
        // max 5a + 4b + 3c s.t. 2a + 3b + c <= 4  (binary) => min negated.
        // Optimum picks a and c: value 8.
        let mut prog = Program::new();
        let a = prog.add_binary("a");
        let b = prog.add_binary("b");
        let c = prog.add_binary("c");
        prog.add_le(
            LinExpr::term(a, 2.0).plus_term(b, 3.0).plus_term(c, 1.0),
            4.0,
        );
        prog.add_linear_cost(
            LinExpr::term(a, -5.0)
                .plus_term(b, -4.0)
                .plus_term(c, -3.0),
        );

        let result =
            BranchBoundSolver::with_defaults().solve(&prog, None, &mut NoEvents);
        assert_eq!(result.status, MipStatus::Optimal);
        assert_relative_eq!(result.objective, -8.0, epsilon = 1e-6);
        assert_relative_eq!(result.values[a.index()], 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.values[b.index()], 0.0, epsilon = 1e-6);
        assert_relative_eq!(result.values[c.index()], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_infeasible_binary_program() {
        let mut prog = Program::new();
        let a = prog.add_binary("a");
        let b = prog.add_binary("b");
        prog.add_ge(LinExpr::var(a).plus_var(b), 3.0);
        prog.add_linear_cost(LinExpr::var(a));

        let result =
            BranchBoundSolver::with_defaults().solve(&prog, None, &mut NoEvents);
        assert_eq!(result.status, MipStatus::Infeasible);
        assert!(result.objective.is_infinite());
    }

    #[test]
    fn test_pure_lp_passthrough() {
        let mut prog = Program::new();
        let x = prog.add_continuous("x", 0.0, 10.0);
        prog.add_ge(LinExpr::var(x), 2.5);
        prog.add_linear_cost(LinExpr::var(x));

        let result =
            BranchBoundSolver::with_defaults().solve(&prog, None, &mut NoEvents);
        assert_eq!(result.status, MipStatus::Optimal);
        assert_relative_eq!(result.objective, 2.5, epsilon = 1e-6);
    }

    #[test]
    fn test_quadratic_cost_outer_approximation() {
        // min (x - 3)^2, x in [0, 10].
        let mut prog = Program::new();
        let x = prog.add_continuous("x", 0.0, 10.0);
        prog.add_squared_cost(1.0, vec![LinExpr::var(x).plus_const(-3.0)]);

        let result =
            BranchBoundSolver::with_defaults().solve(&prog, None, &mut NoEvents);
        assert_eq!(result.status, MipStatus::Optimal);
        assert!(
            (result.values[x.index()] - 3.0).abs() < 0.05,
            "x = {}",
            result.values[x.index()]
        );
    }

    #[test]
    fn test_solution_hint_seeds_incumbent() {
        struct CountSolutions(usize);
        impl MipEvents for CountSolutions {
            fn on_solution(&mut self, _values: &[f64], _info: &SolveStatusInfo) {
                self.0 += 1;
            }
        }

        let mut prog = Program::new();
        let a = prog.add_binary("a");
        let b = prog.add_binary("b");
        prog.add_eq(LinExpr::var(a).plus_var(b), 1.0);
        prog.add_linear_cost(LinExpr::term(a, 1.0).plus_term(b, 2.0));

        let hint = SolutionHint {
            vars: vec![a, b],
            vals: vec![1.0, 0.0],
        };
        let mut events = CountSolutions(0);
        let result =
            BranchBoundSolver::with_defaults().solve(&prog, Some(&hint), &mut events);
        assert_eq!(result.status, MipStatus::Optimal);
        assert_relative_eq!(result.objective, 1.0, epsilon = 1e-6);
        assert!(events.0 >= 1);
    }

    #[test]
    fn test_node_limit_reports_feasible_or_none() {
        let mut prog = Program::new();
        let vars: Vec<VarId> = (0..6).map(|i| prog.add_binary(format!("b{i}"))).collect();
        let mut sum = LinExpr::new();
        for v in &vars {
            sum = sum.plus_term(*v, 1.0);
        }
        prog.add_ge(sum, 3.0);
        let mut cost = LinExpr::new();
        for (i, v) in vars.iter().enumerate() {
            cost = cost.plus_term(*v, 1.0 + i as f64 * 0.1);
        }
        prog.add_linear_cost(cost);

        let options = SolverOptions {
            node_limit: Some(1),
            ..Default::default()
        };
        let result = BranchBoundSolver::new(options).solve(&prog, None, &mut NoEvents);
        assert!(matches!(
            result.status,
            MipStatus::Feasible | MipStatus::NoSolution | MipStatus::Optimal
        ));
    }

    #[test]
    fn test_history_counters_monotone() {
        struct Track {
            nodes: Vec<usize>,
            times: Vec<f64>,
        }
        impl MipEvents for Track {
            fn on_node(&mut self, _values: &[f64], info: &SolveStatusInfo) -> Option<SolutionHint> {
                self.nodes.push(info.explored_node_count);
                self.times.push(info.reported_runtime);
                None
            }
        }

        let mut prog = Program::new();
        let a = prog.add_binary("a");
        let b = prog.add_binary("b");
        let c = prog.add_binary("c");
        prog.add_le(
            LinExpr::term(a, 1.0).plus_term(b, 1.0).plus_term(c, 1.0),
            2.0,
        );
        prog.add_linear_cost(
            LinExpr::term(a, -1.0)
                .plus_term(b, -1.1)
                .plus_term(c, -0.9),
        );

        let mut track = Track {
            nodes: Vec::new(),
            times: Vec::new(),
        };
        BranchBoundSolver::with_defaults().solve(&prog, None, &mut track);
        assert!(track.nodes.windows(2).all(|w| w[0] <= w[1]));
        assert!(track.times.windows(2).all(|w| w[0] <= w[1]));
    }
}
