//! Mixed-integer global pose estimation for mesh models.
//!
//! Estimates the 6-dof pose of one or more rigid, mesh-described objects
//! from a partial 3D point cloud, jointly solving correspondence
//! assignment and rigid-transform recovery as a mixed-integer program.
//! An asynchronous ICP worker refines relaxed solver states into
//! warm-start heuristics while branch-and-bound runs.
//!
//! # Architecture
//!
//! - [`geometry`]: triangle kernels, mesh aggregation, surface sampling,
//!   exact point-to-mesh distance queries
//! - [`model`]: the free-floating rigid-body set and its configuration
//! - [`program`]: the solver-agnostic MI program model and the bundled
//!   branch-and-bound solver
//! - [`estimator`]: the three MI formulations, rotation envelopes, solve
//!   driver, callbacks, and solution extraction
//! - [`icp`]: damped Gauss-Newton point-to-plane refinement and the
//!   background heuristic worker
//!
//! # Usage
//!
//! ```ignore
//! use mip_mesh_pose::{DetectorParams, MipMeshPoseEstimator, ModelSetConfig};
//!
//! let detector = DetectorParams::from_yaml_str(detector_yaml)?;
//! let models = ModelSetConfig::from_yaml_str(model_yaml)?;
//! let mut estimator = MipMeshPoseEstimator::new(detector, &models)?;
//!
//! let solutions = estimator.estimate_poses(&scene_cloud)?;
//! for estimate in &solutions[0].pose_estimates {
//!     println!("body {}: {}", estimate.obj_ind, estimate.est_tf);
//! }
//! ```

pub mod estimator;
pub mod geometry;
pub mod hod;
pub mod icp;
pub mod model;
pub mod preprocess;
pub mod program;
pub mod solution;
pub mod test_utils;
pub mod viz;

pub use estimator::params::{DetectorParams, DetectorType, RotationConstraint};
pub use estimator::MipMeshPoseEstimator;
pub use geometry::{MeshBank, TriangleMeshData};
pub use icp::{IcpOptions, IcpRefinement};
pub use model::config::ModelSetConfig;
pub use model::RigidBodySet;
pub use solution::{ObjectPoseEstimate, PointCorrespondence, Solution, SolveHistoryElem};
pub use viz::{NullViz, VizPublisher};
