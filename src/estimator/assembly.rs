//! Shared structure of the three MI formulations.
//!
//! Each formulation builds a [`Program`] plus the variable handles the
//! callbacks, warm starts, and extraction need afterwards. The L1 residual
//! wiring is identical between the face-correspondence and sampled-point
//! variants up to which block gates the big-M terms, so it lives here.

use nalgebra::{DMatrix, Matrix3xX};
use tracing::debug;

use crate::estimator::transform_vars::BodyTransformVars;
use crate::program::{LinExpr, Program, VarBlock};

/// Variable handles of an assembled formulation.
#[derive(Debug, Clone)]
pub struct FormulationVars {
    pub transforms: Vec<BodyTransformVars>,
    /// Per-scene-point residual slacks (Ns × 1); absent in the quadratic
    /// body-to-world formulation.
    pub phi: Option<VarBlock>,
    /// Three per-axis slack blocks, each B × Ns; empty in body-to-world.
    pub alpha: Vec<VarBlock>,
    /// The correspondence block: continuous affine weights (A), binary
    /// scene→model selection (B), or binary model→scene selection (C).
    pub correspondence: VarBlock,
    /// Face-assignment binaries (formulation A only).
    pub faces: Option<VarBlock>,
    /// Outlier binaries (formulations A and B).
    pub outliers: Option<VarBlock>,
}

/// A formulation ready to hand to the solver.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub program: Program,
    pub vars: FormulationVars,
    /// Body-membership over the model columns the correspondence block
    /// selects from: faces (A) or sampled points (B, C).
    pub body_membership: DMatrix<f64>,
    /// The model columns themselves: all mesh vertices (A) or sampled
    /// surface points (B, C), in body frame.
    pub model_points: Matrix3xX<f64>,
}

/// Allocate φ and the three α slack blocks, constrain them nonnegative
/// through their bounds, and put `(1/Ns)·Σφ` on the objective.
pub fn add_residual_slacks(
    prog: &mut Program,
    num_bodies: usize,
    num_scene: usize,
) -> (VarBlock, Vec<VarBlock>) {
    let phi = prog.add_continuous_block("phi", num_scene, 1, 0.0, f64::INFINITY);
    let alpha = (0..3)
        .map(|k| {
            prog.add_continuous_block(&format!("alpha_{k}"), num_bodies, num_scene, 0.0, f64::INFINITY)
        })
        .collect::<Vec<_>>();

    let mut total = LinExpr::new();
    for i in 0..num_scene {
        total = total.plus_term(phi.at(i, 0), 1.0 / num_scene as f64);
    }
    prog.add_linear_cost(total);

    (phi, alpha)
}

/// The L1 residual decomposition with big-M gating.
///
/// For every scene point i and body b, per axis k:
/// `α_k(b,i) ≥ ±[R_b s_i + T_b − V C[i,:]ᵀ]_k − bigM (1 − Bm[b,:]·g[i,:]ᵀ)`
/// where `g` is the gating block (`f` for faces, `C` itself for sampled
/// points), plus `φ_i = Σ_b Σ_k α_k(b,i) + φ_max·f_outlier[i]`.
#[allow(clippy::too_many_arguments)]
pub fn add_l1_residual_wiring(
    prog: &mut Program,
    transforms: &[BodyTransformVars],
    scene: &Matrix3xX<f64>,
    model_points: &Matrix3xX<f64>,
    weights: &VarBlock,
    gate: &VarBlock,
    body_membership: &DMatrix<f64>,
    outliers: &VarBlock,
    phi: &VarBlock,
    alpha: &[VarBlock],
    phi_max: f64,
    big_m: f64,
) {
    let num_bodies = transforms.len();
    let num_scene = scene.ncols();

    for i in 0..num_scene {
        // φ_i equals the stacked α mass plus the outlier allowance.
        let mut phi_link = LinExpr::var(phi.at(i, 0));
        for block in alpha {
            for b in 0..num_bodies {
                phi_link = phi_link.plus_term(block.at(b, i), -1.0);
            }
        }
        phi_link = phi_link.plus_term(outliers.at(i, 0), -phi_max);
        prog.add_eq(phi_link, 0.0);

        for (b, tf) in transforms.iter().enumerate() {
            // Faces (or sampled points) hosted by this body gate the
            // residual on.
            let gate_cols: Vec<usize> = (0..gate.cols())
                .filter(|&g| body_membership[(b, g)] > 0.5)
                .collect();

            for k in 0..3 {
                // l1err_k = Σ_m R[k][m]·s_i[m] + T[k] − Σ_v V[k,v]·C[i,v]
                let mut err = LinExpr::var(tf.translation[k]);
                for m in 0..3 {
                    err = err.plus_term(tf.rotation[k][m], scene[(m, i)]);
                }
                for v in 0..weights.cols() {
                    err = err.plus_term(weights.at(i, v), -model_points[(k, v)]);
                }

                // α ≥ ±err − bigM(1 − Σ gate), folded to
                // α ∓ err − bigM·Σ gate ≥ −bigM.
                for sign in [1.0, -1.0] {
                    let mut cut = LinExpr::var(alpha[k].at(b, i))
                        .minus_expr(&err.clone().scaled(sign));
                    for &g in &gate_cols {
                        cut = cut.plus_term(gate.at(i, g), -big_m);
                    }
                    prog.add_ge(cut, -big_m);
                }
            }
        }
    }
}

/// Log scene points sitting exactly at the origin; they are allowed but
/// usually indicate an upstream capture bug.
pub fn log_zero_scene_points(scene: &Matrix3xX<f64>) {
    for i in 0..scene.ncols() {
        if scene.column(i).norm() == 0.0 {
            debug!(index = i, "Scene point at exact origin");
        }
    }
}
