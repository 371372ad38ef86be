//! Detector configuration.
//!
//! Field names and defaults track the YAML schema the estimator has always
//! been driven by; solver option maps are passed through untouched so
//! configs written for a specific MI backend keep loading.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::preprocess::PreprocessOptions;
use crate::program::SolverOptions;

#[derive(Debug, Error)]
pub enum DetectorConfigError {
    #[error("rotation_constraint {got} is not in 0..=6")]
    UnknownRotationConstraint { got: i32 },
    #[error("failed to parse detector config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Which MI formulation the solve builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorType {
    /// Formulation A: world→body transforms with face correspondence.
    #[serde(rename = "world_to_body_transforms")]
    WorldToBody,
    /// Formulation B: world→body transforms against sampled model points.
    #[serde(rename = "world_to_body_transforms_with_sampled_model_points")]
    WorldToBodySampledModelPoints,
    /// Formulation C: body→world transforms, quadratic cost.
    #[serde(rename = "body_to_world_transforms")]
    BodyToWorld,
}

/// Rotation-envelope mode for the transform-variable factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationConstraint {
    /// Equality-constrained to the ground-truth rotation.
    FixedToGroundTruth = 0,
    /// Only the [-1, 1] element bounds.
    Free = 1,
    /// Columnwise/rowwise L1 ball around the ground truth.
    L1Ball = 2,
    /// McCormick envelopes of the quaternion outer products.
    QuaternionMcCormick = 3,
    /// McCormick-envelope MILP on SO(3) with threshold indicators.
    McCormickSo3 = 4,
    /// Element bounds implied by rpy limits on [0, π/2].
    RpyLimits = 5,
    /// Piecewise-linear norm envelope with log-encoded interval binaries.
    LogSectorEnvelope = 6,
}

impl RotationConstraint {
    pub fn from_i32(value: i32) -> Result<Self, DetectorConfigError> {
        match value {
            0 => Ok(Self::FixedToGroundTruth),
            1 => Ok(Self::Free),
            2 => Ok(Self::L1Ball),
            3 => Ok(Self::QuaternionMcCormick),
            4 => Ok(Self::McCormickSo3),
            5 => Ok(Self::RpyLimits),
            6 => Ok(Self::LogSectorEnvelope),
            got => Err(DetectorConfigError::UnknownRotationConstraint { got }),
        }
    }
}

/// All detector tunables, serde-deserializable from the YAML config tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    pub detector_type: DetectorType,

    /// Rotation mode, validated through [`RotationConstraint::from_i32`].
    pub rotation_constraint: i32,
    pub rotation_constraint_num_faces: usize,
    pub rotation_constraint_l1_bound: f64,

    pub allow_outliers: bool,
    pub phi_max: f64,

    pub use_initial_guess: bool,
    pub corruption_amount: f64,

    pub downsample_to_this_many_points: i64,
    pub model_sample_rays: usize,
    pub add_this_many_outliers: usize,
    pub outlier_min: [f64; 3],
    pub outlier_max: [f64; 3],
    pub scene_point_additive_noise: f64,

    #[serde(rename = "big_M")]
    pub big_m: f64,

    #[serde(rename = "ICP_prior_weight")]
    pub icp_prior_weight: f64,
    #[serde(rename = "ICP_max_iters")]
    pub icp_max_iters: usize,
    #[serde(rename = "ICP_outlier_rejection_proportion")]
    pub icp_outlier_rejection_proportion: f64,
    #[serde(rename = "ICP_use_as_heuristic")]
    pub icp_use_as_heuristic: bool,

    /// Same-face gate distance: negative disables, exactly 0 auto-computes
    /// from the widest face edge.
    pub max_dist_to_same_face: f64,

    pub model_point_rand_seed: i64,
    pub scene_point_rand_seed: i64,
    pub init_guess_rand_seed: i64,

    #[serde(rename = "HOD_bins")]
    pub hod_bins: usize,
    #[serde(rename = "HOD_dist")]
    pub hod_dist: f64,
    #[serde(rename = "HOD_weight")]
    pub hod_weight: f64,

    pub gurobi_int_options: BTreeMap<String, i64>,
    pub gurobi_float_options: BTreeMap<String, f64>,
    pub mosek_int_options: BTreeMap<String, i64>,
    pub mosek_float_options: BTreeMap<String, f64>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            detector_type: DetectorType::WorldToBody,
            rotation_constraint: 4,
            rotation_constraint_num_faces: 2,
            rotation_constraint_l1_bound: 0.1,
            allow_outliers: true,
            phi_max: 0.1,
            use_initial_guess: false,
            corruption_amount: 100.0,
            downsample_to_this_many_points: -1,
            model_sample_rays: 10,
            add_this_many_outliers: 0,
            outlier_min: [-1.0, -1.0, -1.0],
            outlier_max: [1.0, 1.0, 1.0],
            scene_point_additive_noise: 0.0,
            big_m: 100.0,
            icp_prior_weight: 1.0,
            icp_max_iters: 1000,
            icp_outlier_rejection_proportion: 0.0,
            icp_use_as_heuristic: false,
            max_dist_to_same_face: -1.0,
            model_point_rand_seed: -1,
            scene_point_rand_seed: -1,
            init_guess_rand_seed: -1,
            hod_bins: 5,
            hod_dist: 0.05,
            hod_weight: 0.0,
            gurobi_int_options: BTreeMap::new(),
            gurobi_float_options: BTreeMap::new(),
            mosek_int_options: BTreeMap::new(),
            mosek_float_options: BTreeMap::new(),
        }
    }
}

impl DetectorParams {
    pub fn from_yaml_str(text: &str) -> Result<Self, DetectorConfigError> {
        let params: Self = serde_yaml::from_str(text)?;
        params.rotation_mode()?;
        Ok(params)
    }

    pub fn rotation_mode(&self) -> Result<RotationConstraint, DetectorConfigError> {
        RotationConstraint::from_i32(self.rotation_constraint)
    }

    pub fn preprocess_options(&self) -> PreprocessOptions {
        PreprocessOptions {
            downsample_to: self.downsample_to_this_many_points,
            num_outliers: self.add_this_many_outliers,
            outlier_min: self.outlier_min,
            outlier_max: self.outlier_max,
            noise_sigma: self.scene_point_additive_noise,
            seed: self.scene_point_rand_seed,
        }
    }

    /// Fold every solver pass-through map into bundled-solver options.
    pub fn solver_options(&self) -> SolverOptions {
        let mut options = SolverOptions::default();
        options.apply_int_options(&self.gurobi_int_options);
        options.apply_int_options(&self.mosek_int_options);
        options.apply_float_options(&self.gurobi_float_options);
        options.apply_float_options(&self.mosek_float_options);
        options
    }

    /// Short run tag naming the dominant tunables, used for labeling
    /// outputs.
    pub fn detail_name(&self) -> String {
        format!(
            "det_s{}_o{}_r{}_b{}",
            self.downsample_to_this_many_points,
            self.add_this_many_outliers,
            self.rotation_constraint,
            self.rotation_constraint_num_faces
        )
    }
}
