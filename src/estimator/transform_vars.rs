//! Per-body transform decision variables and rotation envelopes.
//!
//! Translations get a symmetric big-M box. Rotations are 3×3 continuous
//! matrices whose feasible set is shaped by the configured mode: nothing at
//! all, an L1 ball around the ground truth, one of three piecewise-linear
//! envelopes of the orthonormality constraint, rpy-implied element bounds,
//! or exact equality to the ground truth.
//!
//! The envelopes share one idea: a slack variable `sq ≈ R(i,j)²` squeezed
//! between tangent underestimators (always valid for a convex function)
//! and interval-gated secant overestimators, with row and column sums of
//! `sq` pinned to one. The modes differ in how the active interval is
//! encoded: threshold indicators (mode 4), exclusive-bin indicators on the
//! quaternion components (mode 3), or a logarithmically-encoded λ-form
//! (mode 6).

use nalgebra::{DVector, Matrix3};

use crate::estimator::params::RotationConstraint;
use crate::model::RigidBodySet;
use crate::program::{LinExpr, Program, VarId};

/// Threshold indicator tensors of the mode-4 envelope.
///
/// `positive[k][i][j] = 1 ⇔ R(i,j) ≥ k/K`, and
/// `negative[k][i][j] = 1 ⇔ R(i,j) ≤ -k/K`.
#[derive(Debug, Clone)]
pub struct RotationIndicators {
    pub positive: Vec<[[VarId; 3]; 3]>,
    pub negative: Vec<[[VarId; 3]; 3]>,
}

/// Decision-variable handles for one body's rigid transform.
#[derive(Debug, Clone)]
pub struct BodyTransformVars {
    pub translation: [VarId; 3],
    /// Row-major rotation matrix entries.
    pub rotation: [[VarId; 3]; 3],
    /// Present only under [`RotationConstraint::McCormickSo3`].
    pub indicators: Option<RotationIndicators>,
}

impl BodyTransformVars {
    pub fn rotation_expr(&self, i: usize, j: usize) -> LinExpr {
        LinExpr::var(self.rotation[i][j])
    }
}

/// Options consumed by the factory, lifted from the detector config.
#[derive(Debug, Clone)]
pub struct TransformVarOptions {
    pub mode: RotationConstraint,
    pub num_faces: usize,
    pub l1_bound: f64,
    pub big_m: f64,
    /// When true, ground truths are taken body→world (formulation C);
    /// otherwise world→body.
    pub body_to_world: bool,
}

/// Allocate transform variables for every body and attach the configured
/// rotation-envelope constraints.
pub fn add_transform_vars(
    prog: &mut Program,
    robot: &RigidBodySet,
    q_gt: &DVector<f64>,
    options: &TransformVarOptions,
) -> Vec<BodyTransformVars> {
    let mut all = Vec::with_capacity(robot.num_bodies());
    for body_id in 1..=robot.num_bodies() {
        let name = &robot.body(body_id).name;
        let suffix = format!("{name}_{body_id}");

        let translation = [
            prog.add_continuous(format!("T_{suffix}[0]"), -options.big_m, options.big_m),
            prog.add_continuous(format!("T_{suffix}[1]"), -options.big_m, options.big_m),
            prog.add_continuous(format!("T_{suffix}[2]"), -options.big_m, options.big_m),
        ];

        let mut rotation = [[VarId(0); 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                rotation[i][j] = prog.add_continuous(format!("R_{suffix}[{i},{j}]"), -1.0, 1.0);
            }
        }

        let gt_pose = robot.body_pose(q_gt, body_id);
        let gt_tf = if options.body_to_world {
            gt_pose
        } else {
            gt_pose.inverse()
        };
        let gt_rot: Matrix3<f64> = gt_tf.rotation.to_rotation_matrix().into_inner();

        let indicators = match options.mode {
            RotationConstraint::Free => None,
            RotationConstraint::L1Ball => {
                add_l1_ball(prog, &rotation, &gt_rot, options.l1_bound, &suffix);
                None
            }
            RotationConstraint::QuaternionMcCormick => {
                add_quaternion_mccormick(prog, &rotation, options.num_faces.max(1), &suffix);
                None
            }
            RotationConstraint::McCormickSo3 => Some(add_mccormick_so3(
                prog,
                &rotation,
                options.num_faces.max(1),
                &suffix,
            )),
            RotationConstraint::RpyLimits => {
                add_rpy_limit_bounds(prog, &rotation);
                None
            }
            RotationConstraint::LogSectorEnvelope => {
                add_log_norm_envelope(prog, &rotation, options.num_faces.max(1), &suffix);
                None
            }
            RotationConstraint::FixedToGroundTruth => {
                for i in 0..3 {
                    for j in 0..3 {
                        prog.add_eq(LinExpr::var(rotation[i][j]), gt_rot[(i, j)]);
                    }
                }
                None
            }
        };

        all.push(BodyTransformVars {
            translation,
            rotation,
            indicators,
        });
    }
    all
}

/// Mode 2: `‖R − R_gt‖_L1 ≤ ε` per column and per row, via nonnegative
/// slack matrices, plus the trivial `‖R‖_L1 ≤ √3` bounds.
fn add_l1_ball(
    prog: &mut Program,
    rotation: &[[VarId; 3]; 3],
    gt_rot: &Matrix3<f64>,
    l1_bound: f64,
    suffix: &str,
) {
    let mut r_abs = [[VarId(0); 3]; 3];
    let mut r_diff = [[VarId(0); 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            r_abs[i][j] =
                prog.add_continuous(format!("Rabs_{suffix}[{i},{j}]"), 0.0, f64::INFINITY);
            r_diff[i][j] =
                prog.add_continuous(format!("Rdiff_{suffix}[{i},{j}]"), 0.0, f64::INFINITY);

            prog.add_ge(
                LinExpr::var(r_abs[i][j]).plus_term(rotation[i][j], -1.0),
                0.0,
            );
            prog.add_ge(LinExpr::var(r_abs[i][j]).plus_var(rotation[i][j]), 0.0);
            prog.add_ge(
                LinExpr::var(r_diff[i][j]).plus_term(rotation[i][j], -1.0),
                -gt_rot[(i, j)],
            );
            prog.add_ge(
                LinExpr::var(r_diff[i][j]).plus_var(rotation[i][j]),
                gt_rot[(i, j)],
            );
        }
    }
    let sqrt3 = 3.0_f64.sqrt();
    for k in 0..3 {
        let mut diff_col = LinExpr::new();
        let mut diff_row = LinExpr::new();
        let mut abs_col = LinExpr::new();
        let mut abs_row = LinExpr::new();
        for i in 0..3 {
            diff_col = diff_col.plus_var(r_diff[i][k]);
            diff_row = diff_row.plus_var(r_diff[k][i]);
            abs_col = abs_col.plus_var(r_abs[i][k]);
            abs_row = abs_row.plus_var(r_abs[k][i]);
        }
        prog.add_le(diff_col, l1_bound);
        prog.add_le(diff_row, l1_bound);
        prog.add_le(abs_col, sqrt3);
        prog.add_le(abs_row, sqrt3);
    }
}

/// Tangent underestimators of `sq ≥ x²` at the envelope grid points,
/// always valid for the convex square.
fn add_square_tangents(prog: &mut Program, x: VarId, sq: VarId, k: usize) {
    for t in -(k as i64)..=(k as i64) {
        let c = t as f64 / k as f64;
        prog.add_ge(LinExpr::var(sq).plus_term(x, -2.0 * c), -c * c);
    }
}

/// Mode 4: the McCormick-envelope MILP on SO(3).
///
/// Per element, threshold binaries pin the sign-interval of `R(i,j)` at
/// resolution `1/K`; interval-gated secants and global tangents squeeze a
/// square slack, and row/column sums of the slacks equal one.
fn add_mccormick_so3(
    prog: &mut Program,
    rotation: &[[VarId; 3]; 3],
    k: usize,
    suffix: &str,
) -> RotationIndicators {
    let kf = k as f64;
    let mut positive = vec![[[VarId(0); 3]; 3]; k];
    let mut negative = vec![[[VarId(0); 3]; 3]; k];
    let mut sq = [[VarId(0); 3]; 3];

    for i in 0..3 {
        for j in 0..3 {
            let r = rotation[i][j];
            sq[i][j] = prog.add_continuous(format!("Rsq_{suffix}[{i},{j}]"), 0.0, 1.0);
            add_square_tangents(prog, r, sq[i][j], k);

            for step in 0..k {
                let threshold = step as f64 / kf;
                let bpos = prog.add_binary(format!("Bpos{step}_{suffix}[{i},{j}]"));
                let bneg = prog.add_binary(format!("Bneg{step}_{suffix}[{i},{j}]"));
                positive[step][i][j] = bpos;
                negative[step][i][j] = bneg;

                // Bpos = 1 ⇔ R ≥ threshold.
                prog.add_ge(LinExpr::var(r).plus_term(bpos, -2.0), threshold - 2.0);
                prog.add_le(LinExpr::var(r).plus_term(bpos, -2.0), threshold);
                // Bneg = 1 ⇔ R ≤ -threshold.
                prog.add_le(LinExpr::var(r).plus_term(bneg, 2.0), 2.0 - threshold);
                prog.add_ge(LinExpr::var(r).plus_term(bneg, 2.0), -threshold);
            }

            for step in 0..k {
                if step + 1 < k {
                    prog.add_le(
                        LinExpr::var(positive[step + 1][i][j])
                            .plus_term(positive[step][i][j], -1.0),
                        0.0,
                    );
                    prog.add_le(
                        LinExpr::var(negative[step + 1][i][j])
                            .plus_term(negative[step][i][j], -1.0),
                        0.0,
                    );
                }
                if step > 0 {
                    prog.add_le(
                        LinExpr::var(positive[step][i][j]).plus_var(negative[step][i][j]),
                        1.0,
                    );
                }
            }
            // The element sits on at least one side of zero.
            prog.add_ge(
                LinExpr::var(positive[0][i][j]).plus_var(negative[0][i][j]),
                1.0,
            );

            // Interval-gated secant overestimators. The interval
            // [step/K, (step+1)/K] is active when Bpos[step] = 1 and
            // Bpos[step+1] = 0 (the top interval only needs the first).
            for step in 0..k {
                let a = step as f64 / kf;
                let b = (step + 1) as f64 / kf;
                // sq ≤ (a+b)·R − ab + 4·gate
                let mut gate = LinExpr::constant(1.0).plus_term(positive[step][i][j], -1.0);
                if step + 1 < k {
                    gate = gate.plus_var(positive[step + 1][i][j]);
                }
                prog.add_le(
                    LinExpr::var(sq[i][j])
                        .plus_term(r, -(a + b))
                        .minus_expr(&gate.scaled(4.0)),
                    -a * b,
                );

                // sq ≤ -(a+b)·R − ab + 4·gate on the mirrored interval.
                let mut gate = LinExpr::constant(1.0).plus_term(negative[step][i][j], -1.0);
                if step + 1 < k {
                    gate = gate.plus_var(negative[step + 1][i][j]);
                }
                prog.add_le(
                    LinExpr::var(sq[i][j])
                        .plus_term(r, a + b)
                        .minus_expr(&gate.scaled(4.0)),
                    -a * b,
                );
            }
        }
    }

    add_unit_norm_sums(prog, &sq);
    RotationIndicators { positive, negative }
}

/// Rows and columns of the square slacks sum to one.
fn add_unit_norm_sums(prog: &mut Program, sq: &[[VarId; 3]; 3]) {
    for i in 0..3 {
        let mut row = LinExpr::new();
        let mut col = LinExpr::new();
        for j in 0..3 {
            row = row.plus_var(sq[i][j]);
            col = col.plus_var(sq[j][i]);
        }
        prog.add_eq(row, 1.0);
        prog.add_eq(col, 1.0);
    }
}

/// Mode 3: McCormick envelopes of the quaternion outer products.
///
/// A unit quaternion `(w, x, y, z)` with `w ≥ 0` parameterizes the
/// rotation; the ten pairwise products get exclusive-bin McCormick
/// envelopes at `num_faces` bins per half axis, and the rotation entries
/// are linear in the products.
fn add_quaternion_mccormick(
    prog: &mut Program,
    rotation: &[[VarId; 3]; 3],
    num_faces: usize,
    suffix: &str,
) {
    // Component 0 is w ∈ [0, 1]; the vector part spans [-1, 1].
    let quat = [
        prog.add_continuous(format!("quat_{suffix}[0]"), 0.0, 1.0),
        prog.add_continuous(format!("quat_{suffix}[1]"), -1.0, 1.0),
        prog.add_continuous(format!("quat_{suffix}[2]"), -1.0, 1.0),
        prog.add_continuous(format!("quat_{suffix}[3]"), -1.0, 1.0),
    ];
    let lowers = [0.0, -1.0, -1.0, -1.0];

    // Exclusive interval indicators per component.
    let mut bins: Vec<Vec<(VarId, f64, f64)>> = Vec::with_capacity(4);
    for (c, &q) in quat.iter().enumerate() {
        let n_bins = if c == 0 { num_faces } else { 2 * num_faces };
        let width = (1.0 - lowers[c]) / n_bins as f64;
        let mut component_bins = Vec::with_capacity(n_bins);
        let mut one_hot = LinExpr::new();
        let mut lower_link = LinExpr::var(q);
        let mut upper_link = LinExpr::var(q);
        for b in 0..n_bins {
            let lo = lowers[c] + b as f64 * width;
            let hi = lo + width;
            let lambda = prog.add_binary(format!("qbin{c}_{b}_{suffix}"));
            one_hot = one_hot.plus_var(lambda);
            lower_link = lower_link.plus_term(lambda, -lo);
            upper_link = upper_link.plus_term(lambda, -hi);
            component_bins.push((lambda, lo, hi));
        }
        prog.add_eq(one_hot, 1.0);
        prog.add_ge(lower_link, 0.0);
        prog.add_le(upper_link, 0.0);
        bins.push(component_bins);
    }

    // Products w_ij = q_i q_j for i ≤ j.
    let mut products = [[VarId(0); 4]; 4];
    for i in 0..4 {
        for j in i..4 {
            let lo = if i == j { 0.0 } else { -1.0 };
            let w = prog.add_continuous(format!("qprod{i}{j}_{suffix}"), lo, 1.0);
            products[i][j] = w;

            if i == j {
                // Square: global tangents + per-bin gated secants.
                add_square_tangents(prog, quat[i], w, 2 * num_faces);
                for &(lambda, a, b) in &bins[i] {
                    prog.add_le(
                        LinExpr::var(w)
                            .plus_term(quat[i], -(a + b))
                            .plus_term(lambda, 4.0),
                        -a * b + 4.0,
                    );
                }
            } else {
                // Bilinear McCormick cuts, big-M gated on the bin pair
                // (gate slack 8·(2 − λi − λj) folded into both sides).
                for &(li, a, b) in &bins[i] {
                    for &(lj, c, d) in &bins[j] {
                        prog.add_ge(
                            LinExpr::var(w)
                                .plus_term(quat[j], -a)
                                .plus_term(quat[i], -c)
                                .plus_term(li, -8.0)
                                .plus_term(lj, -8.0),
                            -a * c - 16.0,
                        );
                        prog.add_ge(
                            LinExpr::var(w)
                                .plus_term(quat[j], -b)
                                .plus_term(quat[i], -d)
                                .plus_term(li, -8.0)
                                .plus_term(lj, -8.0),
                            -b * d - 16.0,
                        );
                        prog.add_le(
                            LinExpr::var(w)
                                .plus_term(quat[j], -a)
                                .plus_term(quat[i], -d)
                                .plus_term(li, 8.0)
                                .plus_term(lj, 8.0),
                            -a * d + 16.0,
                        );
                        prog.add_le(
                            LinExpr::var(w)
                                .plus_term(quat[j], -b)
                                .plus_term(quat[i], -c)
                                .plus_term(li, 8.0)
                                .plus_term(lj, 8.0),
                            -b * c + 16.0,
                        );
                    }
                }
            }
        }
    }

    // Unit quaternion.
    prog.add_eq(
        LinExpr::var(products[0][0])
            .plus_var(products[1][1])
            .plus_var(products[2][2])
            .plus_var(products[3][3]),
        1.0,
    );

    // Rotation entries in terms of the products.
    let w = |i: usize, j: usize| products[i.min(j)][i.max(j)];
    let link = |prog: &mut Program, r: VarId, terms: &[(VarId, f64)], rhs: f64| {
        let mut expr = LinExpr::var(r);
        for &(v, a) in terms {
            expr = expr.plus_term(v, a);
        }
        prog.add_eq(expr, rhs);
    };
    // R00 = 1 − 2(y² + z²), etc.
    link(prog, rotation[0][0], &[(w(2, 2), 2.0), (w(3, 3), 2.0)], 1.0);
    link(prog, rotation[1][1], &[(w(1, 1), 2.0), (w(3, 3), 2.0)], 1.0);
    link(prog, rotation[2][2], &[(w(1, 1), 2.0), (w(2, 2), 2.0)], 1.0);
    link(prog, rotation[0][1], &[(w(1, 2), -2.0), (w(0, 3), 2.0)], 0.0);
    link(prog, rotation[1][0], &[(w(1, 2), -2.0), (w(0, 3), -2.0)], 0.0);
    link(prog, rotation[0][2], &[(w(1, 3), -2.0), (w(0, 2), -2.0)], 0.0);
    link(prog, rotation[2][0], &[(w(1, 3), -2.0), (w(0, 2), 2.0)], 0.0);
    link(prog, rotation[1][2], &[(w(2, 3), -2.0), (w(0, 1), 2.0)], 0.0);
    link(prog, rotation[2][1], &[(w(2, 3), -2.0), (w(0, 1), -2.0)], 0.0);
}

/// Mode 5: element bounds implied by roll, pitch, yaw all in [0, π/2].
fn add_rpy_limit_bounds(prog: &mut Program, rotation: &[[VarId; 3]; 3]) {
    let bounds: [[(f64, f64); 3]; 3] = [
        [(0.0, 1.0), (-1.0, 1.0), (0.0, 1.0)],
        [(0.0, 1.0), (0.0, 1.0), (-1.0, 1.0)],
        [(-1.0, 0.0), (0.0, 1.0), (0.0, 1.0)],
    ];
    for i in 0..3 {
        for j in 0..3 {
            let (lo, hi) = bounds[i][j];
            prog.set_bounds(rotation[i][j], lo, hi);
        }
    }
}

/// Mode 6: the norm envelope of mode 4 with the interval selection
/// expressed as a λ-formulation over 2^L pieces, the interval choice
/// encoded in L gray-coded binaries instead of one indicator per
/// threshold.
fn add_log_norm_envelope(
    prog: &mut Program,
    rotation: &[[VarId; 3]; 3],
    num_faces: usize,
    suffix: &str,
) {
    // Round the requested resolution up to a power of two per half axis.
    let mut levels = 1usize;
    while (1usize << levels) < 2 * num_faces {
        levels += 1;
    }
    let pieces = 1usize << levels;
    let breakpoints: Vec<f64> = (0..=pieces)
        .map(|t| -1.0 + 2.0 * t as f64 / pieces as f64)
        .collect();

    let mut sq = [[VarId(0); 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            let r = rotation[i][j];
            sq[i][j] = prog.add_continuous(format!("Rsq_{suffix}[{i},{j}]"), 0.0, 1.0);
            add_square_tangents(prog, r, sq[i][j], pieces / 2);

            // λ weights over the breakpoints.
            let lambdas: Vec<VarId> = (0..=pieces)
                .map(|t| prog.add_continuous(format!("lam{t}_{suffix}[{i},{j}]"), 0.0, 1.0))
                .collect();
            let mut sum = LinExpr::new();
            let mut x_link = LinExpr::var(r);
            let mut chord = LinExpr::var(sq[i][j]);
            for (t, &lam) in lambdas.iter().enumerate() {
                sum = sum.plus_var(lam);
                x_link = x_link.plus_term(lam, -breakpoints[t]);
                chord = chord.plus_term(lam, -breakpoints[t] * breakpoints[t]);
            }
            prog.add_eq(sum, 1.0);
            prog.add_eq(x_link, 0.0);
            // sq may not exceed the chord of the active piece.
            prog.add_le(chord, 0.0);

            // Gray-coded SOS2 selection: breakpoints whose every adjacent
            // piece has bit l set may only be active when the bit is set,
            // and vice versa.
            for l in 0..levels {
                let bit = prog.add_binary(format!("lamsel{l}_{suffix}[{i},{j}]"));
                let gray = |piece: usize| (piece ^ (piece >> 1)) >> l & 1;
                let mut set_side = LinExpr::new();
                let mut clear_side = LinExpr::new();
                for t in 0..=pieces {
                    let left = if t > 0 { Some(gray(t - 1)) } else { None };
                    let right = if t < pieces { Some(gray(t)) } else { None };
                    let all_set = left.unwrap_or(1) == 1 && right.unwrap_or(1) == 1;
                    let all_clear = left.unwrap_or(0) == 0 && right.unwrap_or(0) == 0;
                    if all_set {
                        set_side = set_side.plus_var(lambdas[t]);
                    }
                    if all_clear {
                        clear_side = clear_side.plus_var(lambdas[t]);
                    }
                }
                prog.add_le(set_side.plus_term(bit, -1.0), 0.0);
                prog.add_le(clear_side.plus_term(bit, 1.0), 1.0);
            }
        }
    }

    add_unit_norm_sums(prog, &sq);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::params::RotationConstraint;
    use crate::model::config::{GeometrySpec, ModelEntry, ModelSetConfig};
    use crate::program::{BranchBoundSolver, MipStatus, NoEvents};
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn single_cube(q0: Vec<f64>) -> (RigidBodySet, DVector<f64>) {
        let config = ModelSetConfig {
            models: vec![ModelEntry {
                name: "cube".into(),
                geometry: GeometrySpec::Box {
                    size: [1.0, 1.0, 1.0],
                },
                q0,
            }],
        };
        RigidBodySet::from_config(&config).unwrap()
    }

    fn options(mode: RotationConstraint) -> TransformVarOptions {
        TransformVarOptions {
            mode,
            num_faces: 2,
            l1_bound: 0.1,
            big_m: 100.0,
            body_to_world: true,
        }
    }

    /// Feasibility of pinning the envelope to a given rotation matrix.
    fn envelope_admits(mode: RotationConstraint, rot: &Matrix3<f64>) -> bool {
        let (robot, q_gt) = single_cube(vec![0.0; 6]);
        let mut prog = Program::new();
        let tf_vars = add_transform_vars(&mut prog, &robot, &q_gt, &options(mode));
        for i in 0..3 {
            for j in 0..3 {
                prog.add_eq(LinExpr::var(tf_vars[0].rotation[i][j]), rot[(i, j)]);
            }
        }
        let result = BranchBoundSolver::with_defaults().solve(&prog, None, &mut NoEvents);
        result.status == MipStatus::Optimal
    }

    #[test]
    fn test_translation_bounds_follow_big_m() {
        let (robot, q_gt) = single_cube(vec![0.0; 6]);
        let mut prog = Program::new();
        let tf_vars =
            add_transform_vars(&mut prog, &robot, &q_gt, &options(RotationConstraint::Free));
        for k in 0..3 {
            assert_eq!(prog.var_lower(tf_vars[0].translation[k]), -100.0);
            assert_eq!(prog.var_upper(tf_vars[0].translation[k]), 100.0);
        }
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(prog.var_lower(tf_vars[0].rotation[i][j]), -1.0);
                assert_eq!(prog.var_upper(tf_vars[0].rotation[i][j]), 1.0);
            }
        }
    }

    #[test]
    fn test_fixed_mode_pins_ground_truth() {
        let yaw = 0.7;
        let (robot, q_gt) = single_cube(vec![0.0, 0.0, 0.0, 0.0, 0.0, yaw]);
        let mut prog = Program::new();
        let tf_vars = add_transform_vars(
            &mut prog,
            &robot,
            &q_gt,
            &options(RotationConstraint::FixedToGroundTruth),
        );
        let result = BranchBoundSolver::with_defaults().solve(&prog, None, &mut NoEvents);
        assert_eq!(result.status, MipStatus::Optimal);

        let expected = Rotation3::from_euler_angles(0.0, 0.0, yaw);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(
                    result.values[tf_vars[0].rotation[i][j].index()],
                    expected[(i, j)],
                    epsilon = 1e-6
                );
            }
        }
    }

    #[test]
    fn test_mccormick_so3_admits_true_rotations() {
        for rot in [
            Rotation3::identity().into_inner(),
            Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_4).into_inner(),
            Rotation3::from_euler_angles(0.3, -0.4, 1.2).into_inner(),
        ] {
            assert!(
                envelope_admits(RotationConstraint::McCormickSo3, &rot),
                "true rotation rejected by mode-4 envelope"
            );
        }
    }

    #[test]
    fn test_mccormick_so3_rejects_shrunken_matrix() {
        let shrunk = Rotation3::identity().into_inner() * 0.5;
        assert!(
            !envelope_admits(RotationConstraint::McCormickSo3, &shrunk),
            "matrix with column norm 0.5 should violate the norm envelope"
        );
    }

    #[test]
    fn test_mode4_indicator_semantics_at_solution() {
        let rot = Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_4).into_inner();
        let (robot, q_gt) = single_cube(vec![0.0; 6]);
        let mut prog = Program::new();
        let tf_vars = add_transform_vars(
            &mut prog,
            &robot,
            &q_gt,
            &options(RotationConstraint::McCormickSo3),
        );
        for i in 0..3 {
            for j in 0..3 {
                prog.add_eq(LinExpr::var(tf_vars[0].rotation[i][j]), rot[(i, j)]);
            }
        }
        let result = BranchBoundSolver::with_defaults().solve(&prog, None, &mut NoEvents);
        assert_eq!(result.status, MipStatus::Optimal);

        let indicators = tf_vars[0].indicators.as_ref().unwrap();
        let k = indicators.positive.len() as f64;
        for (step, tensor) in indicators.positive.iter().enumerate() {
            let threshold = step as f64 / k;
            for i in 0..3 {
                for j in 0..3 {
                    let bit = result.values[tensor[i][j].index()];
                    if rot[(i, j)] > threshold + 1e-6 {
                        assert_relative_eq!(bit, 1.0, epsilon = 1e-6);
                    }
                    if rot[(i, j)] < threshold - 1e-6 {
                        assert_relative_eq!(bit, 0.0, epsilon = 1e-6);
                    }
                }
            }
        }
    }

    #[test]
    fn test_l1_ball_bounds_deviation() {
        let yaw = 0.4;
        let (robot, q_gt) = single_cube(vec![0.0, 0.0, 0.0, 0.0, 0.0, yaw]);
        let mut prog = Program::new();
        let tf_vars = add_transform_vars(
            &mut prog,
            &robot,
            &q_gt,
            &TransformVarOptions {
                body_to_world: true,
                ..options(RotationConstraint::L1Ball)
            },
        );
        // Maximize deviation of one entry from ground truth.
        prog.add_linear_cost(LinExpr::term(tf_vars[0].rotation[0][0], -1.0));
        let result = BranchBoundSolver::with_defaults().solve(&prog, None, &mut NoEvents);
        assert_eq!(result.status, MipStatus::Optimal);

        let gt = Rotation3::from_euler_angles(0.0, 0.0, yaw);
        let value = result.values[tf_vars[0].rotation[0][0].index()];
        assert!((value - gt[(0, 0)]).abs() <= 0.1 + 1e-6);
    }

    #[test]
    fn test_rpy_limit_bounds_applied() {
        let (robot, q_gt) = single_cube(vec![0.0; 6]);
        let mut prog = Program::new();
        let tf_vars = add_transform_vars(
            &mut prog,
            &robot,
            &q_gt,
            &options(RotationConstraint::RpyLimits),
        );
        assert_eq!(prog.var_lower(tf_vars[0].rotation[0][0]), 0.0);
        assert_eq!(prog.var_upper(tf_vars[0].rotation[2][0]), 0.0);
        assert_eq!(prog.var_lower(tf_vars[0].rotation[2][0]), -1.0);
        assert_eq!(prog.var_lower(tf_vars[0].rotation[0][1]), -1.0);
    }

    #[test]
    fn test_quaternion_envelope_admits_identity() {
        assert!(envelope_admits(
            RotationConstraint::QuaternionMcCormick,
            &Rotation3::identity().into_inner(),
        ));
    }

    #[test]
    fn test_log_envelope_admits_and_rejects() {
        assert!(envelope_admits(
            RotationConstraint::LogSectorEnvelope,
            &Rotation3::from_euler_angles(0.0, 0.0, 0.5).into_inner(),
        ));
        let shrunk = Rotation3::identity().into_inner() * 0.4;
        assert!(!envelope_admits(
            RotationConstraint::LogSectorEnvelope,
            &shrunk
        ));
    }
}
