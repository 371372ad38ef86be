//! Formulation C: body→world transforms with sampled model points and a
//! quadratic cost.
//!
//! Every sampled model point must pick exactly one scene point; the cost
//! `Σᵢ ‖R vᵢ + T − Σⱼ C[i,j] sⱼ‖²` is quadratic in the transforms alone
//! because `C` is a selection matrix.

use anyhow::{bail, Result};
use nalgebra::{DVector, Isometry3, Matrix3, Matrix3xX, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::estimator::assembly::{log_zero_scene_points, Assembled, FormulationVars};
use crate::estimator::params::DetectorParams;
use crate::estimator::transform_vars::{add_transform_vars, TransformVarOptions};
use crate::geometry::{surface_area_weighted_sample, MeshBank};
use crate::model::RigidBodySet;
use crate::program::{LinExpr, Program};
use crate::solution::{ObjectPoseEstimate, PointCorrespondence};

pub fn build(
    params: &DetectorParams,
    robot: &RigidBodySet,
    q_gt: &DVector<f64>,
    mesh: &MeshBank,
    scene: &Matrix3xX<f64>,
) -> Result<Assembled> {
    let num_scene = scene.ncols();
    if num_scene == 0 {
        bail!("Scene cloud is empty");
    }
    if params.model_sample_rays == 0 {
        bail!("model_sample_rays must be positive for the body-to-world formulation");
    }
    log_zero_scene_points(scene);

    let mut rng = if params.model_point_rand_seed < 0 {
        StdRng::from_entropy()
    } else {
        StdRng::seed_from_u64(params.model_point_rand_seed as u64)
    };
    let (model_points, body_membership) =
        surface_area_weighted_sample(mesh, params.model_sample_rays, &mut rng);
    let num_model = model_points.ncols();

    let mut prog = Program::new();
    let transforms = add_transform_vars(
        &mut prog,
        robot,
        q_gt,
        &TransformVarOptions {
            mode: params.rotation_mode()?,
            num_faces: params.rotation_constraint_num_faces,
            l1_bound: params.rotation_constraint_l1_bound,
            big_m: params.big_m,
            body_to_world: true,
        },
    );

    // Every model point corresponds to exactly one scene point.
    let selection = prog.add_binary_block("C", num_model, num_scene);
    for i in 0..num_model {
        let mut row = LinExpr::new();
        for j in 0..num_scene {
            row = row.plus_var(selection.at(i, j));
        }
        prog.add_eq(row, 1.0);
    }

    // Quadratic correspondence cost per model point, against its hosting
    // body's transform.
    for i in 0..num_model {
        let body = (0..robot.num_bodies())
            .find(|&b| body_membership[(b, i)] > 0.5)
            .expect("sampled point without hosting body");
        let tf = &transforms[body];
        let v: Vector3<f64> = model_points.column(i).into();

        let mut residuals = Vec::with_capacity(3);
        for k in 0..3 {
            let mut expr = LinExpr::var(tf.translation[k]);
            for m in 0..3 {
                expr = expr.plus_term(tf.rotation[k][m], v[m]);
            }
            for j in 0..num_scene {
                expr = expr.plus_term(selection.at(i, j), -scene[(k, j)]);
            }
            residuals.push(expr);
        }
        prog.add_squared_cost(1.0, residuals);
    }

    debug!(
        num_model,
        num_vars = prog.num_vars(),
        num_binaries = prog.num_binaries(),
        num_constraints = prog.num_constraints(),
        "Body-to-world formulation assembled"
    );

    Ok(Assembled {
        program: prog,
        vars: FormulationVars {
            transforms,
            phi: None,
            alpha: Vec::new(),
            correspondence: selection,
            faces: None,
            outliers: None,
        },
        body_membership,
        model_points,
    })
}

/// Pose estimates from the model→scene selection matrix; transforms are
/// used as-is (they already map body→world).
pub fn extract(
    assembled: &Assembled,
    scene: &Matrix3xX<f64>,
    c_est: &nalgebra::DMatrix<f64>,
    estimates: &[(Matrix3<f64>, Vector3<f64>, Isometry3<f64>)],
) -> Vec<ObjectPoseEstimate> {
    let mut out = Vec::new();
    for (b, (r_fit, t_fit, est_tf)) in estimates.iter().enumerate() {
        let mut estimate = ObjectPoseEstimate {
            obj_ind: b + 1,
            r_fit: *r_fit,
            t_fit: *t_fit,
            est_tf: *est_tf,
            correspondences: Vec::new(),
        };
        for model_i in 0..c_est.nrows() {
            if assembled.body_membership[(b, model_i)] < 0.5 {
                continue;
            }
            for scene_i in 0..c_est.ncols() {
                if c_est[(model_i, scene_i)] > 0.5 {
                    estimate.correspondences.push(PointCorrespondence {
                        scene_pt: scene.column(scene_i).into(),
                        model_pt: assembled.model_points.column(model_i).into(),
                        face_ind: 0,
                        scene_ind: scene_i,
                        model_verts: Vec::new(),
                        vert_weights: Vec::new(),
                        vert_inds: vec![model_i],
                    });
                }
            }
        }
        if !estimate.correspondences.is_empty() {
            out.push(estimate);
        }
    }
    out
}
