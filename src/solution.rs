//! Output model of a pose-estimation solve.

use nalgebra::{Isometry3, Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// One scene-point ↔ model correspondence backing a pose estimate.
#[derive(Debug, Clone)]
pub struct PointCorrespondence {
    pub scene_pt: Vector3<f64>,
    pub model_pt: Vector3<f64>,
    pub face_ind: usize,
    pub scene_ind: usize,
    /// Vertices of the assigned face carrying nonzero affine weight.
    pub model_verts: Vec<Vector3<f64>>,
    pub vert_weights: Vec<f64>,
    pub vert_inds: Vec<usize>,
}

/// Estimated pose of one body plus its supporting correspondences.
#[derive(Debug, Clone)]
pub struct ObjectPoseEstimate {
    /// 1-based body id.
    pub obj_ind: usize,
    /// Rotation exactly as the formulation parameterized it.
    pub r_fit: Matrix3<f64>,
    /// Translation exactly as the formulation parameterized it.
    pub t_fit: Vector3<f64>,
    /// Body-in-world transform, direction convention already applied.
    pub est_tf: Isometry3<f64>,
    pub correspondences: Vec<PointCorrespondence>,
}

/// Result of one solve call.
#[derive(Debug, Clone)]
pub struct Solution {
    pub pose_estimates: Vec<ObjectPoseEstimate>,
    /// Best integer-feasible objective (+∞ if none was ever observed).
    pub objective: f64,
    pub lower_bound: f64,
    /// Wall time of the solve, seconds.
    pub solve_time: f64,
}

/// One sample of solver progress. The sequence is append-only and
/// time-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveHistoryElem {
    /// Unix wall-clock time of the sample, seconds.
    pub wall_time: f64,
    /// Runtime the solver itself reports, seconds.
    pub reported_runtime: f64,
    pub best_objective: f64,
    pub best_bound: f64,
    pub explored_node_count: usize,
    pub feasible_solutions_count: usize,
}

/// Seconds since the Unix epoch, the timestamp convention of the solve
/// history.
pub fn unix_time_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_serializes() {
        let elem = SolveHistoryElem {
            wall_time: 1.0,
            reported_runtime: 0.5,
            best_objective: 2.0,
            best_bound: 1.5,
            explored_node_count: 10,
            feasible_solutions_count: 2,
        };
        let json = serde_json::to_string(&elem).unwrap();
        let back: SolveHistoryElem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.explored_node_count, 10);
    }

    #[test]
    fn test_unix_time_monotone() {
        let a = unix_time_now();
        let b = unix_time_now();
        assert!(b >= a);
    }
}
