//! Formulation A: world→body transforms with face correspondence.
//!
//! Binary `f` picks one face (or the outlier slot) per scene point, and a
//! continuous row of `C` expresses the matched model point as an affine
//! combination of the chosen face's vertices, the convex-hull reformulation
//! that keeps the program linear.

use anyhow::{bail, Result};
use nalgebra::{DVector, Isometry3, Matrix3, Matrix3xX, Vector3};
use tracing::{debug, info};

use crate::estimator::assembly::{
    add_l1_residual_wiring, add_residual_slacks, log_zero_scene_points, Assembled,
    FormulationVars,
};
use crate::estimator::params::DetectorParams;
use crate::estimator::transform_vars::{add_transform_vars, TransformVarOptions};
use crate::geometry::MeshBank;
use crate::model::RigidBodySet;
use crate::program::{LinExpr, Program};
use crate::solution::{ObjectPoseEstimate, PointCorrespondence};

/// The column-occupancy cap keeps this many rows free whenever the
/// same-face gate is active.
const COLUMN_CAP_MARGIN: usize = 10;

pub fn build(
    params: &DetectorParams,
    robot: &RigidBodySet,
    q_gt: &DVector<f64>,
    mesh: &MeshBank,
    scene: &Matrix3xX<f64>,
) -> Result<Assembled> {
    let num_scene = scene.ncols();
    let num_faces = mesh.num_faces();
    let num_vertices = mesh.num_vertices();
    let num_bodies = robot.num_bodies();
    if num_scene == 0 {
        bail!("Scene cloud is empty");
    }
    log_zero_scene_points(scene);

    let face_membership = mesh.face_membership();
    let body_membership = mesh.body_membership();

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

    let (phi, alpha) = add_residual_slacks(&mut prog, num_bodies, num_scene);

    // Affine weights over model vertices, face selectors, outlier slots.
    let weights = prog.add_continuous_block("C", num_scene, num_vertices, 0.0, 1.0);
    let faces = prog.add_binary_block("f", num_scene, num_faces);
    let outliers = prog.add_binary_block("f_outlier", num_scene, 1);

    if !params.allow_outliers {
        let mut sum = LinExpr::new();
        for i in 0..num_scene {
            sum = sum.plus_var(outliers.at(i, 0));
        }
        prog.add_eq(sum, 0.0);
    }

    // Same-face spatial gate. A value of exactly zero asks for the
    // automatic threshold; negative disables the gate.
    let mut max_dist_to_same_face = params.max_dist_to_same_face;
    if max_dist_to_same_face == 0.0 {
        let widest_face = mesh.widest_face_edge();
        if widest_face > 0.0 {
            max_dist_to_same_face = widest_face + 2.0 * params.phi_max;
            info!(widest_face, max_dist_to_same_face, "Same-face gate auto threshold");
        } else {
            max_dist_to_same_face = -1.0;
            debug!("Widest face is zero; same-face gate disabled");
        }
    }

    if max_dist_to_same_face > 0.0 {
        for i1 in 0..num_scene {
            for i2 in (i1 + 1)..num_scene {
                let dist = (scene.column(i1) - scene.column(i2)).norm();
                if dist >= max_dist_to_same_face {
                    for face in 0..num_faces {
                        prog.add_le(
                            LinExpr::var(faces.at(i1, face)).plus_var(faces.at(i2, face)),
                            1.0,
                        );
                    }
                }
            }
        }

        // Cap per-vertex weight occupancy to discourage degenerate
        // solutions; skipped for tiny scenes where the margin would make
        // the cap nonpositive.
        if num_scene > COLUMN_CAP_MARGIN {
            for v in 0..num_vertices {
                let mut sum = LinExpr::new();
                for i in 0..num_scene {
                    sum = sum.plus_var(weights.at(i, v));
                }
                prog.add_le(sum, (num_scene - COLUMN_CAP_MARGIN) as f64);
            }
        } else {
            debug!(num_scene, "Scene too small for the column occupancy cap");
        }
    }

    for i in 0..num_scene {
        // Affine weights sum to one with the outlier slot.
        let mut weight_sum = LinExpr::new();
        for v in 0..num_vertices {
            weight_sum = weight_sum.plus_var(weights.at(i, v));
        }
        prog.add_eq(weight_sum.plus_var(outliers.at(i, 0)), 1.0);

        // Exactly one face or the outlier slot.
        let mut face_sum = LinExpr::new();
        for face in 0..num_faces {
            face_sum = face_sum.plus_var(faces.at(i, face));
        }
        prog.add_eq(face_sum.plus_var(outliers.at(i, 0)), 1.0);

        // A vertex may carry weight only when the selected face contains
        // it: C[i,v] ≤ F[:,v]·f[i,:].
        for v in 0..num_vertices {
            let mut cut = LinExpr::var(weights.at(i, v));
            for face in 0..num_faces {
                if face_membership[(face, v)] > 0.5 {
                    cut = cut.plus_term(faces.at(i, face), -1.0);
                }
            }
            prog.add_le(cut, 0.0);
        }
    }

    add_l1_residual_wiring(
        &mut prog,
        &transforms,
        scene,
        mesh.vertices(),
        &weights,
        &faces,
        &body_membership,
        &outliers,
        &phi,
        &alpha,
        params.phi_max,
        params.big_m,
    );

    // Rotation indicator binaries branch first.
    for tf in &transforms {
        if let Some(indicators) = &tf.indicators {
            for tensor in indicators.positive.iter().chain(indicators.negative.iter()) {
                for row in tensor {
                    for &var in row {
                        prog.set_branch_priority(var, 10);
                    }
                }
            }
        }
    }

    debug!(
        num_vars = prog.num_vars(),
        num_binaries = prog.num_binaries(),
        num_constraints = prog.num_constraints(),
        "World-to-body formulation assembled"
    );

    Ok(Assembled {
        program: prog,
        vars: FormulationVars {
            transforms,
            phi: Some(phi),
            alpha,
            correspondence: weights,
            faces: Some(faces),
            outliers: Some(outliers),
        },
        body_membership,
        model_points: mesh.vertices().clone(),
    })
}

/// Turn the assignment matrices and per-body transforms into pose
/// estimates with face correspondences.
pub fn extract(
    assembled: &Assembled,
    mesh: &MeshBank,
    scene: &Matrix3xX<f64>,
    f_est: &nalgebra::DMatrix<f64>,
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
        let world_to_body = est_tf.inverse();

        for scene_i in 0..scene.ncols() {
            for face_i in 0..f_est.ncols() {
                if f_est[(scene_i, face_i)] > 0.5
                    && assembled.body_membership[(b, face_i)] > 0.5
                {
                    let scene_pt: Vector3<f64> = scene.column(scene_i).into();
                    let mut corresp = PointCorrespondence {
                        scene_pt,
                        model_pt: (world_to_body * nalgebra::Point3::from(scene_pt)).coords,
                        face_ind: face_i,
                        scene_ind: scene_i,
                        model_verts: Vec::new(),
                        vert_weights: Vec::new(),
                        vert_inds: Vec::new(),
                    };
                    for v in 0..c_est.ncols() {
                        if c_est[(scene_i, v)] > 0.0 {
                            corresp.model_verts.push(mesh.vertices().column(v).into());
                            corresp.vert_weights.push(c_est[(scene_i, v)]);
                            corresp.vert_inds.push(v);
                        }
                    }
                    estimate.correspondences.push(corresp);
                }
            }
        }

        if !estimate.correspondences.is_empty() {
            out.push(estimate);
        }
    }
    out
}
