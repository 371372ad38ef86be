//! Dense Big-M simplex for the LP relaxations of the branch-and-bound loop.
//!
//! Variables are shifted to be nonnegative, finite upper bounds become
//! rows, and every row gets a slack or artificial column. Bland's rule is
//! used throughout so degenerate relaxations terminate. The problems this
//! crate builds are small and dense, so a tableau method is the simplest
//! thing that is obviously correct.

use nalgebra::DMatrix;
use tracing::warn;

use super::{LinConstraint, Program, Sense};

const PIVOT_TOL: f64 = 1e-9;
const FEAS_TOL: f64 = 1e-7;
/// Reduced costs are polluted by cancellation against the Big-M rows;
/// entering columns below this magnitude are treated as converged.
const REDUCED_COST_TOL: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    Unbounded,
}

#[derive(Debug, Clone)]
pub struct LpOutcome {
    pub status: LpStatus,
    pub objective: f64,
    /// One value per program variable; empty unless `Optimal`.
    pub values: Vec<f64>,
}

impl LpOutcome {
    fn without_solution(status: LpStatus) -> Self {
        Self {
            status,
            objective: f64::INFINITY,
            values: Vec::new(),
        }
    }
}

/// Solve the LP relaxation of `program` with per-variable bound overrides
/// and extra cut rows.
///
/// `lower`/`upper` give the effective bounds per variable (node fixings
/// already applied). Integrality is ignored here.
pub fn solve_relaxation(
    program: &Program,
    cuts: &[LinConstraint],
    lower: &[f64],
    upper: &[f64],
) -> LpOutcome {
    let n = program.num_vars();
    debug_assert_eq!(lower.len(), n);
    debug_assert_eq!(upper.len(), n);

    for j in 0..n {
        if lower[j] > upper[j] + FEAS_TOL {
            return LpOutcome::without_solution(LpStatus::Infeasible);
        }
    }

    // Dense rows over the shifted variables x̂ = x - lower.
    struct Row {
        coeffs: Vec<f64>,
        sense: Sense,
        rhs: f64,
    }
    let mut rows: Vec<Row> = Vec::new();

    let mut push_constraint = |c: &LinConstraint| {
        let mut coeffs = vec![0.0; n];
        let mut shift = c.expr.constant;
        for &(v, a) in &c.expr.terms {
            coeffs[v.0] += a;
            shift += a * lower[v.0];
        }
        rows.push(Row {
            coeffs,
            sense: c.sense,
            rhs: c.rhs - shift,
        });
    };
    for c in program.constraints() {
        push_constraint(c);
    }
    for c in cuts {
        push_constraint(c);
    }

    // Finite upper bounds as rows: x̂_j ≤ u_j - l_j.
    for j in 0..n {
        if upper[j].is_finite() {
            let width = upper[j] - lower[j];
            let mut coeffs = vec![0.0; n];
            coeffs[j] = 1.0;
            rows.push(Row {
                coeffs,
                sense: Sense::Le,
                rhs: width,
            });
        }
    }

    // Normalize to nonnegative right-hand sides.
    for row in rows.iter_mut() {
        if row.rhs < 0.0 {
            for a in row.coeffs.iter_mut() {
                *a = -*a;
            }
            row.rhs = -row.rhs;
            row.sense = match row.sense {
                Sense::Le => Sense::Ge,
                Sense::Ge => Sense::Le,
                Sense::Eq => Sense::Eq,
            };
        }
    }

    let m = rows.len();
    // Column layout: n structural, then one slack/surplus or artificial
    // column per row as needed.
    let mut extra_cols = 0usize;
    for row in &rows {
        extra_cols += match row.sense {
            Sense::Le => 1,
            Sense::Ge => 2,
            Sense::Eq => 1,
        };
    }
    let total = n + extra_cols;

    let mut tableau = DMatrix::<f64>::zeros(m, total + 1);
    let mut basis = vec![0usize; m];
    let mut is_artificial = vec![false; total];

    let mut next_col = n;
    for (i, row) in rows.iter().enumerate() {
        for j in 0..n {
            tableau[(i, j)] = row.coeffs[j];
        }
        tableau[(i, total)] = row.rhs;
        match row.sense {
            Sense::Le => {
                tableau[(i, next_col)] = 1.0;
                basis[i] = next_col;
                next_col += 1;
            }
            Sense::Ge => {
                tableau[(i, next_col)] = -1.0; // surplus
                tableau[(i, next_col + 1)] = 1.0; // artificial
                is_artificial[next_col + 1] = true;
                basis[i] = next_col + 1;
                next_col += 2;
            }
            Sense::Eq => {
                tableau[(i, next_col)] = 1.0;
                is_artificial[next_col] = true;
                basis[i] = next_col;
                next_col += 1;
            }
        }
    }

    // Big-M objective row over shifted variables.
    let cost = program.linear_cost();
    let mut c_row = vec![0.0; total];
    let mut max_abs_c: f64 = 0.0;
    for &(v, a) in &cost.terms {
        c_row[v.0] += a;
    }
    for j in 0..n {
        max_abs_c = max_abs_c.max(c_row[j].abs());
    }
    let big_m = 1e5 * (1.0 + max_abs_c);
    for (j, flag) in is_artificial.iter().enumerate() {
        if *flag {
            c_row[j] = big_m;
        }
    }

    // Reduced-cost row, canonicalized against the starting basis.
    let mut reduced = vec![0.0; total + 1];
    reduced[..total].copy_from_slice(&c_row);
    for i in 0..m {
        let cb = c_row[basis[i]];
        if cb != 0.0 {
            for j in 0..=total {
                reduced[j] -= cb * tableau[(i, j)];
            }
        }
    }

    let max_pivots = 20_000 + 200 * (m + total);
    let mut pivots = 0usize;
    loop {
        // Bland: smallest-index entering column with negative reduced cost.
        let mut entering = None;
        for j in 0..total {
            if reduced[j] < -REDUCED_COST_TOL {
                entering = Some(j);
                break;
            }
        }
        let Some(entering) = entering else { break };

        // Ratio test, Bland tie-break on basis variable index.
        let mut leaving: Option<(usize, f64)> = None;
        for i in 0..m {
            let a = tableau[(i, entering)];
            if a > PIVOT_TOL {
                let ratio = tableau[(i, total)] / a;
                match leaving {
                    None => leaving = Some((i, ratio)),
                    Some((best_i, best_ratio)) => {
                        if ratio < best_ratio - PIVOT_TOL
                            || ((ratio - best_ratio).abs() <= PIVOT_TOL
                                && basis[i] < basis[best_i])
                        {
                            leaving = Some((i, ratio));
                        }
                    }
                }
            }
        }
        let Some((pivot_row, _)) = leaving else {
            return LpOutcome::without_solution(LpStatus::Unbounded);
        };

        // Pivot.
        let pivot = tableau[(pivot_row, entering)];
        for j in 0..=total {
            tableau[(pivot_row, j)] /= pivot;
        }
        for i in 0..m {
            if i != pivot_row {
                let factor = tableau[(i, entering)];
                if factor.abs() > 0.0 {
                    for j in 0..=total {
                        tableau[(i, j)] -= factor * tableau[(pivot_row, j)];
                    }
                }
            }
        }
        let factor = reduced[entering];
        if factor.abs() > 0.0 {
            for j in 0..=total {
                reduced[j] -= factor * tableau[(pivot_row, j)];
            }
        }
        basis[pivot_row] = entering;

        pivots += 1;
        if pivots > max_pivots {
            warn!(pivots, rows = m, cols = total, "Simplex pivot cap reached");
            break;
        }
    }

    // Any artificial left at a positive level means infeasible.
    for i in 0..m {
        if is_artificial[basis[i]] && tableau[(i, total)] > FEAS_TOL {
            return LpOutcome::without_solution(LpStatus::Infeasible);
        }
    }

    let mut values = lower.to_vec();
    for i in 0..m {
        if basis[i] < n {
            values[basis[i]] = lower[basis[i]] + tableau[(i, total)];
        }
    }

    LpOutcome {
        status: LpStatus::Optimal,
        objective: cost.eval(&values),
        values,
    }
}
