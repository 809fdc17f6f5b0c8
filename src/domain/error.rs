//! Error taxonomy for the zone server core

use thiserror::Error;

/// Errors surfaced by zone lookup, registry correlation and localization
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ZoneError {
    /// Zone name is not part of the loaded zone set
    #[error("zone not found: {0}")]
    NotFound(String),

    /// Zone geometry rejected at load time
    #[error("invalid polygon for zone {zone}: {vertices} distinct vertices (need at least 3)")]
    InvalidPolygon { zone: String, vertices: usize },

    /// Two zone definitions share a name
    #[error("duplicate zone name: {0}")]
    DuplicateZone(String),

    /// Device registry, location registry or localization service call failed or timed out
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Device answered but did not report a control configured for the zone
    #[error("device {device_id} did not report control {control_id}")]
    ControlNotReported { device_id: String, control_id: String },

    /// Observation frame has no known transform into the map frame
    #[error("no transform from frame {frame} to {target}")]
    TransformUnavailable { frame: String, target: String },
}

impl ZoneError {
    /// Short machine-readable kind, used in API error bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ZoneError::NotFound(_) => "not_found",
            ZoneError::InvalidPolygon { .. } => "invalid_polygon",
            ZoneError::DuplicateZone(_) => "duplicate_zone",
            ZoneError::RegistryUnavailable(_) => "registry_unavailable",
            ZoneError::ControlNotReported { .. } => "control_not_reported",
            ZoneError::TransformUnavailable { .. } => "transform_unavailable",
        }
    }

    /// Whether the error originates from an upstream registry or service call
    pub fn is_upstream(&self) -> bool {
        matches!(self, ZoneError::RegistryUnavailable(_) | ZoneError::ControlNotReported { .. })
    }
}
