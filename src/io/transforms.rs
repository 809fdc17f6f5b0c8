//! Static frame table for normalizing observations into the map frame
//!
//! Each configured frame carries a 2-D rigid transform (translation plus yaw)
//! taking points from that frame into the map frame. Poses already in the map
//! frame, or with no frame at all, pass through unchanged.

use crate::domain::error::ZoneError;
use crate::domain::types::{epoch_ms, Point2, Pose, Quaternion, RawPose};
use crate::infra::config::StaticFrameConfig;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy)]
struct Transform2 {
    x: f64,
    y: f64,
    yaw: f64,
}

impl Transform2 {
    fn apply(&self, p: Point2) -> Point2 {
        let (sin, cos) = self.yaw.sin_cos();
        Point2::new(self.x + cos * p.x - sin * p.y, self.y + sin * p.x + cos * p.y)
    }
}

#[derive(Debug, Clone)]
pub struct FrameTransforms {
    map_frame: String,
    frames: FxHashMap<String, Transform2>,
}

impl FrameTransforms {
    pub fn new(map_frame: &str, static_frames: &[StaticFrameConfig]) -> Self {
        let frames = static_frames
            .iter()
            .map(|f| (f.frame.clone(), Transform2 { x: f.x, y: f.y, yaw: f.yaw }))
            .collect();
        Self { map_frame: map_frame.to_string(), frames }
    }

    pub fn map_frame(&self) -> &str {
        &self.map_frame
    }

    /// Express `raw` in the map frame
    ///
    /// A zero header stamp is replaced with the current time.
    pub fn to_map(&self, raw: RawPose) -> Result<Pose, ZoneError> {
        let frame = raw.header.frame_id.trim_start_matches('/');
        let stamp_ms = if raw.header.stamp_ms == 0 { epoch_ms() } else { raw.header.stamp_ms };
        let point = Point2::new(raw.pose.position.x, raw.pose.position.y);

        if frame.is_empty() || frame == self.map_frame {
            return Ok(Pose {
                point,
                orientation: raw.pose.orientation,
                frame_id: self.map_frame.clone(),
                stamp_ms,
            });
        }

        let Some(transform) = self.frames.get(frame) else {
            return Err(ZoneError::TransformUnavailable {
                frame: frame.to_string(),
                target: self.map_frame.clone(),
            });
        };

        Ok(Pose {
            point: transform.apply(point),
            orientation: Quaternion::from_yaw(transform.yaw).mul(&raw.pose.orientation),
            frame_id: self.map_frame.clone(),
            stamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Header, PoseBody, Position};
    use std::f64::consts::FRAC_PI_2;

    fn raw(frame: &str, x: f64, y: f64) -> RawPose {
        RawPose {
            header: Header { frame_id: frame.to_string(), stamp_ms: 500 },
            pose: PoseBody { position: Position { x, y, z: 0.0 }, orientation: Quaternion::default() },
        }
    }

    fn transforms() -> FrameTransforms {
        FrameTransforms::new(
            "map",
            &[StaticFrameConfig { frame: "odom".to_string(), x: 10.0, y: 5.0, yaw: FRAC_PI_2 }],
        )
    }

    #[test]
    fn test_map_frame_passes_through() {
        let pose = transforms().to_map(raw("map", 1.0, 2.0)).unwrap();
        assert_eq!(pose.point, Point2::new(1.0, 2.0));
        assert_eq!(pose.frame_id, "map");
        assert_eq!(pose.stamp_ms, 500);
    }

    #[test]
    fn test_leading_slash_and_empty_frame() {
        let t = transforms();
        assert!(t.to_map(raw("/map", 1.0, 2.0)).is_ok());
        assert_eq!(t.to_map(raw("", 1.0, 2.0)).unwrap().frame_id, "map");
    }

    #[test]
    fn test_static_transform_rotates_and_translates() {
        let pose = transforms().to_map(raw("odom", 1.0, 0.0)).unwrap();
        assert!((pose.point.x - 10.0).abs() < 1e-9);
        assert!((pose.point.y - 6.0).abs() < 1e-9);
        assert!((pose.orientation.yaw() - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_frame_unavailable() {
        let err = transforms().to_map(raw("base_link", 0.0, 0.0)).unwrap_err();
        assert_eq!(
            err,
            ZoneError::TransformUnavailable { frame: "base_link".to_string(), target: "map".to_string() }
        );
    }

    #[test]
    fn test_zero_stamp_uses_now() {
        let mut observation = raw("map", 0.0, 0.0);
        observation.header.stamp_ms = 0;
        assert!(transforms().to_map(observation).unwrap().stamp_ms > 0);
    }
}
