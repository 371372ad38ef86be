//! Model-set configuration.
//!
//! Mesh geometry arrives inline (a box primitive or an explicit triangle
//! list); URDF parsing is a collaborator outside this crate, so the config
//! carries the data that collaborator would have produced. Initial states
//! accept 6 values (translation + rpy) or 7 (translation + wxyz quaternion,
//! auto-converted).

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::geometry::TriangleMeshData;

/// Errors raised while validating a model configuration.
#[derive(Debug, Error)]
pub enum ModelConfigError {
    #[error("model config lists no models")]
    NoModels,
    #[error("model `{name}`: q0 has {got} entries, expected 6 (rpy) or 7 (quaternion)")]
    BadStateLength { name: String, got: usize },
    #[error("model `{name}`: mesh has no triangles")]
    EmptyMesh { name: String },
    #[error("failed to parse model config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Geometry payload for one body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometrySpec {
    /// Axis-aligned box, edge lengths in meters, centered on the body frame.
    Box { size: [f64; 3] },
    /// Explicit triangle mesh in the body frame.
    Mesh {
        vertices: Vec<[f64; 3]>,
        triangles: Vec<[usize; 3]>,
    },
}

impl GeometrySpec {
    pub fn to_mesh(&self) -> TriangleMeshData {
        match self {
            GeometrySpec::Box { size } => TriangleMeshData::axis_aligned_box(*size),
            GeometrySpec::Mesh {
                vertices,
                triangles,
            } => TriangleMeshData {
                vertices: vertices
                    .iter()
                    .map(|v| Vector3::new(v[0], v[1], v[2]))
                    .collect(),
                triangles: triangles.clone(),
            },
        }
    }
}

/// One entry of the `models:` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(default)]
    pub name: String,
    pub geometry: GeometrySpec,
    /// Ground-truth generalized coordinates: `[x, y, z, r, p, y]` or
    /// `[x, y, z, qw, qx, qy, qz]`.
    pub q0: Vec<f64>,
}

impl ModelEntry {
    /// The 6-dof state, converting a quaternion form if present.
    pub fn state_rpy(&self) -> Result<[f64; 6], ModelConfigError> {
        match self.q0.len() {
            6 => Ok([
                self.q0[0], self.q0[1], self.q0[2], self.q0[3], self.q0[4], self.q0[5],
            ]),
            7 => {
                debug!(model = %self.name, "Converting initial condition from quaternion to rpy");
                let quat = UnitQuaternion::from_quaternion(Quaternion::new(
                    self.q0[3], self.q0[4], self.q0[5], self.q0[6],
                ));
                let (roll, pitch, yaw) = quat.euler_angles();
                Ok([self.q0[0], self.q0[1], self.q0[2], roll, pitch, yaw])
            }
            got => Err(ModelConfigError::BadStateLength {
                name: self.name.clone(),
                got,
            }),
        }
    }
}

/// Top-level model configuration: the list of bodies to estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSetConfig {
    pub models: Vec<ModelEntry>,
}

impl ModelSetConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ModelConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        Ok(config)
    }
}
