//! Formulation B: world→body transforms against sampled model points.
//!
//! The model surface is represented by an area-weighted sample; each scene
//! point picks exactly one sampled point (or the outlier slot) through a
//! binary row of `C`. The residual wiring matches formulation A with `C`
//! itself gating the big-M terms. An optional histogram-of-distances cost
//! penalizes descriptor mismatch between assigned pairs.

use anyhow::{bail, Result};
use nalgebra::{DVector, Isometry3, Matrix3, Matrix3xX, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::estimator::assembly::{
    add_l1_residual_wiring, add_residual_slacks, log_zero_scene_points, Assembled,
    FormulationVars,
};
use crate::estimator::params::DetectorParams;
use crate::estimator::transform_vars::{add_transform_vars, TransformVarOptions};
use crate::geometry::{surface_area_weighted_sample, MeshBank};
use crate::hod::hod_descriptors;
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
    let num_bodies = robot.num_bodies();
    if num_scene == 0 {
        bail!("Scene cloud is empty");
    }
    if params.model_sample_rays == 0 {
        bail!("model_sample_rays must be positive for the sampled-point formulation");
    }
    log_zero_scene_points(scene);

    // Sample the model surface; this cloud *is* the model from here on.
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
            body_to_world: false,
        },
    );

    // Binary selection of one sampled model point per scene point.
    let selection = prog.add_binary_block("C", num_scene, num_model);
    let outliers = prog.add_binary_block("f_outlier", num_scene, 1);

    if !params.allow_outliers {
        let mut sum = LinExpr::new();
        for i in 0..num_scene {
            sum = sum.plus_var(outliers.at(i, 0));
        }
        prog.add_eq(sum, 0.0);
    }

    for i in 0..num_scene {
        let mut row = LinExpr::new();
        for m in 0..num_model {
            row = row.plus_var(selection.at(i, m));
        }
        prog.add_eq(row.plus_var(outliers.at(i, 0)), 1.0);
    }

    let (phi, alpha) = add_residual_slacks(&mut prog, num_bodies, num_scene);

    add_l1_residual_wiring(
        &mut prog,
        &transforms,
        scene,
        &model_points,
        &selection,
        &selection,
        &body_membership,
        &outliers,
        &phi,
        &alpha,
        params.phi_max,
        params.big_m,
    );

    // Histogram-of-distances feature cost: weighted L1 error between each
    // scene descriptor and the descriptor of its assigned model point.
    if params.hod_weight > 0.0 {
        let scene_features = hod_descriptors(scene, params.hod_bins, params.hod_dist);
        let model_features = hod_descriptors(&model_points, params.hod_bins, params.hod_dist);
        let bins = params.hod_bins;

        let phi_feat = prog.add_continuous_block("phi_feat", num_scene, 1, 0.0, f64::INFINITY);
        let alpha_feat =
            prog.add_continuous_block("alpha_feat", bins, num_scene, 0.0, f64::INFINITY);

        let mut cost = LinExpr::new();
        for i in 0..num_scene {
            cost = cost.plus_term(phi_feat.at(i, 0), params.hod_weight / num_scene as f64);
        }
        prog.add_linear_cost(cost);

        for i in 0..num_scene {
            let mut link = LinExpr::var(phi_feat.at(i, 0));
            for bin in 0..bins {
                link = link.plus_term(alpha_feat.at(bin, i), -1.0);
            }
            prog.add_eq(link, 0.0);

            for bin in 0..bins {
                // ±(scene_feat − model_feat · C[i,:]ᵀ) ≤ α_feat
                for sign in [1.0, -1.0] {
                    let mut cut = LinExpr::var(alpha_feat.at(bin, i))
                        .plus_const(-sign * scene_features[(bin, i)]);
                    for m in 0..num_model {
                        cut = cut.plus_term(selection.at(i, m), sign * model_features[(bin, m)]);
                    }
                    prog.add_ge(cut, 0.0);
                }
            }
        }
    }

    debug!(
        num_model,
        num_vars = prog.num_vars(),
        num_binaries = prog.num_binaries(),
        num_constraints = prog.num_constraints(),
        "Sampled-model-point formulation assembled"
    );

    Ok(Assembled {
        program: prog,
        vars: FormulationVars {
            transforms,
            phi: Some(phi),
            alpha,
            correspondence: selection,
            faces: None,
            outliers: Some(outliers),
        },
        body_membership,
        model_points,
    })
}

/// Pose estimates with point-to-point correspondences from the binary
/// selection matrix.
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
        for scene_i in 0..scene.ncols() {
            for model_i in 0..c_est.ncols() {
                if c_est[(scene_i, model_i)] > 0.5
                    && assembled.body_membership[(b, model_i)] > 0.5
                {
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
