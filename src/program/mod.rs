//! Solver-agnostic mixed-integer program model.
//!
//! The pose formulations speak only this surface: continuous/binary
//! variables with bounds and branch priorities, linear constraints, linear
//! costs, and convex quadratic (sum-of-squared-linear-expression) costs.
//! The bundled [`solver::BranchBoundSolver`] consumes the same surface, so
//! a different MI backend can be swapped in behind it.

pub mod simplex;
pub mod solver;

pub use solver::{
    BranchBoundSolver, MipEvents, MipResult, MipStatus, NoEvents, SolutionHint, SolveStatusInfo,
    SolverOptions,
};

use nalgebra::DMatrix;

/// Handle to a decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) usize);

impl VarId {
    /// Position of this variable in a solver value vector.
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Continuous,
    Binary,
}

#[derive(Debug, Clone)]
struct VarInfo {
    name: String,
    kind: VarKind,
    lower: f64,
    upper: f64,
    branch_priority: i32,
}

/// Sparse linear expression `Σ aᵢ·xᵢ + c`.
#[derive(Debug, Clone, Default)]
pub struct LinExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(v: VarId) -> Self {
        Self {
            terms: vec![(v, 1.0)],
            constant: 0.0,
        }
    }

    pub fn term(v: VarId, coeff: f64) -> Self {
        Self {
            terms: vec![(v, coeff)],
            constant: 0.0,
        }
    }

    pub fn constant(c: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: c,
        }
    }

    pub fn plus_var(mut self, v: VarId) -> Self {
        self.terms.push((v, 1.0));
        self
    }

    pub fn plus_term(mut self, v: VarId, coeff: f64) -> Self {
        self.terms.push((v, coeff));
        self
    }

    pub fn plus_const(mut self, c: f64) -> Self {
        self.constant += c;
        self
    }

    pub fn plus_expr(mut self, other: &LinExpr) -> Self {
        self.terms.extend_from_slice(&other.terms);
        self.constant += other.constant;
        self
    }

    pub fn minus_expr(mut self, other: &LinExpr) -> Self {
        self.terms
            .extend(other.terms.iter().map(|&(v, a)| (v, -a)));
        self.constant -= other.constant;
        self
    }

    pub fn scaled(mut self, s: f64) -> Self {
        for (_, a) in self.terms.iter_mut() {
            *a *= s;
        }
        self.constant *= s;
        self
    }

    pub fn eval(&self, values: &[f64]) -> f64 {
        let mut acc = self.constant;
        for &(v, a) in &self.terms {
            acc += a * values[v.0];
        }
        acc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

/// `expr (sense) rhs`.
#[derive(Debug, Clone)]
pub struct LinConstraint {
    pub expr: LinExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinConstraint {
    /// Nonnegative violation magnitude at a value assignment.
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.expr.eval(values);
        match self.sense {
            Sense::Le => (lhs - self.rhs).max(0.0),
            Sense::Ge => (self.rhs - lhs).max(0.0),
            Sense::Eq => (lhs - self.rhs).abs(),
        }
    }
}

/// Convex quadratic cost `weight · Σₖ eₖ(x)²`.
#[derive(Debug, Clone)]
pub struct QuadCost {
    pub weight: f64,
    pub exprs: Vec<LinExpr>,
}

impl QuadCost {
    pub fn eval(&self, values: &[f64]) -> f64 {
        self.weight
            * self
                .exprs
                .iter()
                .map(|e| {
                    let v = e.eval(values);
                    v * v
                })
                .sum::<f64>()
    }
}

/// Rectangular block of variables, row-major.
#[derive(Debug, Clone)]
pub struct VarBlock {
    ids: Vec<VarId>,
    rows: usize,
    cols: usize,
}

impl VarBlock {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn at(&self, r: usize, c: usize) -> VarId {
        self.ids[r * self.cols + c]
    }

    pub fn row_ids(&self, r: usize) -> &[VarId] {
        &self.ids[r * self.cols..(r + 1) * self.cols]
    }

    pub fn col_ids(&self, c: usize) -> Vec<VarId> {
        (0..self.rows).map(|r| self.at(r, c)).collect()
    }

    pub fn ids(&self) -> &[VarId] {
        &self.ids
    }

    /// Read the block out of a solver value vector.
    pub fn extract(&self, values: &[f64]) -> DMatrix<f64> {
        DMatrix::from_fn(self.rows, self.cols, |r, c| values[self.at(r, c).0])
    }
}

/// A mixed-integer program under construction.
#[derive(Debug, Clone, Default)]
pub struct Program {
    vars: Vec<VarInfo>,
    constraints: Vec<LinConstraint>,
    cost: LinExpr,
    quad_costs: Vec<QuadCost>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_continuous(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        debug_assert!(lower <= upper);
        self.vars.push(VarInfo {
            name: name.into(),
            kind: VarKind::Continuous,
            lower,
            upper,
            branch_priority: 0,
        });
        VarId(self.vars.len() - 1)
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.vars.push(VarInfo {
            name: name.into(),
            kind: VarKind::Binary,
            lower: 0.0,
            upper: 1.0,
            branch_priority: 0,
        });
        VarId(self.vars.len() - 1)
    }

    pub fn add_continuous_block(
        &mut self,
        name: &str,
        rows: usize,
        cols: usize,
        lower: f64,
        upper: f64,
    ) -> VarBlock {
        let ids = (0..rows * cols)
            .map(|k| self.add_continuous(format!("{name}[{},{}]", k / cols, k % cols), lower, upper))
            .collect();
        VarBlock { ids, rows, cols }
    }

    pub fn add_binary_block(&mut self, name: &str, rows: usize, cols: usize) -> VarBlock {
        let ids = (0..rows * cols)
            .map(|k| self.add_binary(format!("{name}[{},{}]", k / cols, k % cols)))
            .collect();
        VarBlock { ids, rows, cols }
    }

    pub fn set_branch_priority(&mut self, v: VarId, priority: i32) {
        self.vars[v.0].branch_priority = priority;
    }

    pub fn set_bounds(&mut self, v: VarId, lower: f64, upper: f64) {
        debug_assert!(lower <= upper);
        self.vars[v.0].lower = lower;
        self.vars[v.0].upper = upper;
    }

    pub fn add_le(&mut self, expr: LinExpr, rhs: f64) {
        self.constraints.push(LinConstraint {
            expr,
            sense: Sense::Le,
            rhs,
        });
    }

    pub fn add_ge(&mut self, expr: LinExpr, rhs: f64) {
        self.constraints.push(LinConstraint {
            expr,
            sense: Sense::Ge,
            rhs,
        });
    }

    pub fn add_eq(&mut self, expr: LinExpr, rhs: f64) {
        self.constraints.push(LinConstraint {
            expr,
            sense: Sense::Eq,
            rhs,
        });
    }

    /// Accumulate a term into the linear objective.
    pub fn add_linear_cost(&mut self, expr: LinExpr) {
        let cost = std::mem::take(&mut self.cost);
        self.cost = cost.plus_expr(&expr);
    }

    /// Accumulate `weight · Σ exprs²` into the objective.
    pub fn add_squared_cost(&mut self, weight: f64, exprs: Vec<LinExpr>) {
        debug_assert!(weight >= 0.0);
        self.quad_costs.push(QuadCost { weight, exprs });
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_binaries(&self) -> usize {
        self.vars
            .iter()
            .filter(|v| v.kind == VarKind::Binary)
            .count()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn var_kind(&self, v: VarId) -> VarKind {
        self.vars[v.0].kind
    }

    pub fn var_lower(&self, v: VarId) -> f64 {
        self.vars[v.0].lower
    }

    pub fn var_upper(&self, v: VarId) -> f64 {
        self.vars[v.0].upper
    }

    pub fn var_name(&self, v: VarId) -> &str {
        &self.vars[v.0].name
    }

    pub fn branch_priority(&self, v: VarId) -> i32 {
        self.vars[v.0].branch_priority
    }

    pub fn constraints(&self) -> &[LinConstraint] {
        &self.constraints
    }

    pub fn linear_cost(&self) -> &LinExpr {
        &self.cost
    }

    pub fn quad_costs(&self) -> &[QuadCost] {
        &self.quad_costs
    }

    /// Full objective (linear + quadratic) at a value assignment.
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.cost.eval(values) + self.quad_costs.iter().map(|q| q.eval(values)).sum::<f64>()
    }

    /// Largest constraint or bound violation at a value assignment.
    pub fn max_violation(&self, values: &[f64]) -> f64 {
        let mut worst: f64 = 0.0;
        for c in &self.constraints {
            worst = worst.max(c.violation(values));
        }
        for (i, info) in self.vars.iter().enumerate() {
            worst = worst.max(info.lower - values[i]);
            worst = worst.max(values[i] - info.upper);
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_eval() {
        let mut prog = Program::new();
        let x = prog.add_continuous("x", 0.0, 10.0);
        let y = prog.add_continuous("y", 0.0, 10.0);
        let expr = LinExpr::var(x).plus_term(y, -2.0).plus_const(3.0);
        assert_eq!(expr.eval(&[5.0, 1.0]), 6.0);
    }

    #[test]
    fn test_constraint_violation() {
        let mut prog = Program::new();
        let x = prog.add_continuous("x", 0.0, 10.0);
        prog.add_le(LinExpr::var(x), 4.0);
        prog.add_eq(LinExpr::var(x), 2.0);

        assert_eq!(prog.constraints()[0].violation(&[5.0]), 1.0);
        assert_eq!(prog.constraints()[1].violation(&[5.0]), 3.0);
        assert_eq!(prog.max_violation(&[5.0]), 3.0);
        assert_eq!(prog.max_violation(&[2.0]), 0.0);
    }

    #[test]
    fn test_block_layout_and_extract() {
        let mut prog = Program::new();
        let block = prog.add_binary_block("f", 2, 3);
        assert_eq!(block.at(1, 2).index(), 5);
        assert_eq!(block.row_ids(1).len(), 3);
        assert_eq!(block.col_ids(2).len(), 2);

        let values = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let m = block.extract(&values);
        assert_eq!(m[(0, 1)], 1.0);
        assert_eq!(m[(1, 0)], 1.0);
        assert_eq!(m[(1, 1)], 0.0);
    }

    #[test]
    fn test_objective_with_quadratic() {
        let mut prog = Program::new();
        let x = prog.add_continuous("x", -10.0, 10.0);
        prog.add_linear_cost(LinExpr::term(x, 2.0));
        prog.add_squared_cost(0.5, vec![LinExpr::var(x).plus_const(-1.0)]);

        // 2x + 0.5 (x - 1)^2 at x = 3: 6 + 2 = 8
        assert_eq!(prog.objective_value(&[3.0]), 8.0);
    }
}
