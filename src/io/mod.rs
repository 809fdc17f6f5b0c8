//! IO modules - external system interfaces
//!
//! - `mqtt` - MQTT client for pose, odometry and localizer observations
//! - `transforms` - Static frame table for map-frame normalization
//! - `mqtt_egress` - MQTT publisher for transition events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `registry` - Device/location registry and localization clients
//! - `http_api` - HTTP API and Prometheus metrics endpoint

pub mod egress_channel;
pub mod http_api;
pub mod mqtt;
pub mod mqtt_egress;
pub mod registry;
pub mod transforms;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use mqtt_egress::MqttPublisher;
