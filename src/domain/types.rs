//! Shared types for the zone server

use crate::domain::zone::ZoneInfo;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Generate a new UUIDv7 (time-sortable) event id
pub fn new_event_id() -> String {
    Uuid::now_v7().to_string()
}

/// A 2-D point in some coordinate frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point2 {
    fn from(p: [f64; 2]) -> Self {
        Self { x: p[0], y: p[1] }
    }
}

/// Orientation as a unit quaternion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "default_w")]
    pub w: f64,
}

fn default_w() -> f64 {
    1.0
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

impl Quaternion {
    /// Rotation of `yaw` radians about the Z axis
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw / 2.0;
        Self { x: 0.0, y: 0.0, z: half.sin(), w: half.cos() }
    }

    /// Hamilton product `self * rhs`
    pub fn mul(&self, rhs: &Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    /// Heading about the Z axis in radians
    pub fn yaw(&self) -> f64 {
        let siny_cosp = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy_cosp = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny_cosp.atan2(cosy_cosp)
    }
}

/// A normalized pose in the map frame, handed to the transition engine
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub point: Point2,
    pub orientation: Quaternion,
    pub frame_id: String,
    /// Observation timestamp (epoch ms)
    pub stamp_ms: u64,
}

impl Pose {
    pub fn new(x: f64, y: f64, frame_id: &str) -> Self {
        Self {
            point: Point2::new(x, y),
            orientation: Quaternion::default(),
            frame_id: frame_id.to_string(),
            stamp_ms: epoch_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound observation messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub frame_id: String,
    /// Observation time in epoch ms (0 means "now")
    #[serde(default)]
    pub stamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoseBody {
    pub position: Position,
    #[serde(default)]
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoseWithCovariance {
    pub pose: PoseBody,
    #[serde(default)]
    pub covariance: Vec<f64>,
}

/// Plain stamped pose
#[derive(Debug, Clone, Deserialize)]
pub struct PoseStamped {
    #[serde(default)]
    pub header: Header,
    pub pose: PoseBody,
}

/// Odometry sample; twist is accepted but ignored
#[derive(Debug, Clone, Deserialize)]
pub struct Odometry {
    #[serde(default)]
    pub header: Header,
    #[serde(default)]
    pub child_frame_id: String,
    pub pose: PoseWithCovariance,
    #[serde(default)]
    pub twist: Option<serde_json::Value>,
}

/// Stamped pose with covariance; covariance is ignored
#[derive(Debug, Clone, Deserialize)]
pub struct PoseWithCovarianceStamped {
    #[serde(default)]
    pub header: Header,
    pub pose: PoseWithCovariance,
}

/// Which inbound channel an observation arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Pose,
    Odometry,
    PoseWithCovariance,
}

impl ObservationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::Pose => "pose",
            ObservationKind::Odometry => "odom",
            ObservationKind::PoseWithCovariance => "pose_with_covariance",
        }
    }
}

/// Observation stripped to header + pose, still in its source frame
#[derive(Debug, Clone)]
pub struct RawPose {
    pub header: Header,
    pub pose: PoseBody,
}

impl From<PoseStamped> for RawPose {
    fn from(msg: PoseStamped) -> Self {
        Self { header: msg.header, pose: msg.pose }
    }
}

impl From<Odometry> for RawPose {
    fn from(msg: Odometry) -> Self {
        Self { header: msg.header, pose: msg.pose.pose }
    }
}

impl From<PoseWithCovarianceStamped> for RawPose {
    fn from(msg: PoseWithCovarianceStamped) -> Self {
        Self { header: msg.header, pose: msg.pose.pose }
    }
}

impl RawPose {
    /// Parse a JSON payload of the given kind
    pub fn parse(kind: ObservationKind, json: &str) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ObservationKind::Pose => serde_json::from_str::<PoseStamped>(json)?.into(),
            ObservationKind::Odometry => serde_json::from_str::<Odometry>(json)?.into(),
            ObservationKind::PoseWithCovariance => {
                serde_json::from_str::<PoseWithCovarianceStamped>(json)?.into()
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Device and location registry types
// ---------------------------------------------------------------------------

/// Static association of a device control with a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDescriptor {
    pub device_id: String,
    pub control_id: String,
    /// Human-readable control name
    pub control: String,
}

/// Live control as reported by the device registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceControl {
    pub control_id: String,
    pub num_val: f64,
    #[serde(default)]
    pub name: Option<String>,
}

/// A zone's control with its live value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneControl {
    pub zone: String,
    pub device_id: String,
    pub control_id: String,
    pub name: String,
    pub num_val: f64,
}

/// Externally registered grouping of devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location_id: String,
    #[serde(default)]
    pub name: String,
}

/// Device entry of a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationDevice {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Localization
// ---------------------------------------------------------------------------

/// Polygon prior for a constrained localization request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonConstraint {
    pub frame_id: String,
    pub points: Vec<Point2>,
}

/// What kind of localization request was dispatched
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LocalizeAck {
    Global,
    Polygon { zone: String, frame_id: String },
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransitionAction {
    Enter,
    Exit,
}

impl TransitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionAction::Enter => "enter",
            TransitionAction::Exit => "exit",
        }
    }
}

/// Zone boundary crossing with its correlated locations
#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    pub id: String,
    pub action: TransitionAction,
    pub zone: ZoneInfo,
    pub locations: Vec<Location>,
    /// Stamp of the pose that triggered the transition (epoch ms)
    pub stamp_ms: u64,
    /// Set when location correlation failed; `locations` is then empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_error: Option<String>,
}
