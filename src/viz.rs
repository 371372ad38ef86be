//! Observability channel: intermediate states published to an external
//! viewer.
//!
//! Transport is a collaborator outside this crate, so the estimator talks
//! to a trait. Rate limiting is the caller's job; implementations should
//! treat every call as cheap-to-drop.

use nalgebra::{DVector, Isometry3, Matrix3xX};
use tracing::debug;

use crate::geometry::{exact_collision_detect, MeshBank};

/// Maximum registration error mapped to full red in the error colormap,
/// meters.
pub const ERROR_COLOR_MAX_DIST: f64 = 0.02;

/// Sink for intermediate solver states.
pub trait VizPublisher: Send + Sync {
    /// Publish a generalized-coordinate state under a path label.
    fn publish_state(&self, path: &[&str], q: &DVector<f64>, color: [f64; 4]);

    /// Publish a point cloud with per-point RGB colors.
    fn publish_point_cloud(&self, path: &[&str], points: &Matrix3xX<f64>, colors: &[[f64; 3]]);
}

/// Publisher that drops everything.
pub struct NullViz;

impl VizPublisher for NullViz {
    fn publish_state(&self, _path: &[&str], _q: &DVector<f64>, _color: [f64; 4]) {}

    fn publish_point_cloud(&self, _path: &[&str], _points: &Matrix3xX<f64>, _colors: &[[f64; 3]]) {}
}

/// Publisher that logs a one-line summary per publish. Useful when running
/// headless.
pub struct LogViz;

impl VizPublisher for LogViz {
    fn publish_state(&self, path: &[&str], q: &DVector<f64>, _color: [f64; 4]) {
        debug!(path = path.join("/"), norm = q.norm(), "viz state");
    }

    fn publish_point_cloud(&self, path: &[&str], points: &Matrix3xX<f64>, _colors: &[[f64; 3]]) {
        debug!(path = path.join("/"), points = points.ncols(), "viz cloud");
    }
}

/// Publish the scene cloud colored by registration error against the posed
/// model: red = far, green = near, saturating at
/// [`ERROR_COLOR_MAX_DIST`].
pub fn publish_error_colored_cloud(
    viz: &dyn VizPublisher,
    mesh: &MeshBank,
    poses: &[Isometry3<f64>],
    scene: &Matrix3xX<f64>,
    path: &[&str],
) {
    let projection = exact_collision_detect(mesh, poses, scene);
    let colors: Vec<[f64; 3]> = (0..scene.ncols())
        .map(|i| {
            let dist = (projection.world_closest.column(i) - scene.column(i)).norm();
            let t = dist / ERROR_COLOR_MAX_DIST;
            [
                t.clamp(0.0, 1.0),
                (1.0 - t).clamp(0.0, 1.0),
                (1.0 - 2.0 * (t - 0.5).abs()).clamp(0.0, 1.0),
            ]
        })
        .collect();
    viz.publish_point_cloud(path, scene, &colors);
}
