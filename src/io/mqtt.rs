//! MQTT client for receiving robot pose observations
//!
//! Three topics feed the same pose channel: plain stamped poses, odometry and
//! poses with covariance. Every payload is stripped to position, orientation,
//! frame and stamp, normalized into the map frame and handed to the
//! transition engine with `try_send` so the MQTT eventloop never blocks.

use crate::domain::types::{ObservationKind, Pose, RawPose};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::transforms::FrameTransforms;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Outcome of handling one inbound publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Forwarded,
    /// Topic is not one of the observation topics
    Ignored,
    /// Payload did not parse or could not be expressed in the map frame
    Rejected,
    /// Pose channel full
    Dropped,
    /// Pose channel closed, the engine is gone
    Closed,
}

/// Topic routing, parsing and normalization for inbound observations
pub struct PoseIngest {
    topics: Vec<(String, ObservationKind)>,
    transforms: FrameTransforms,
    pose_tx: mpsc::Sender<Pose>,
    metrics: Arc<Metrics>,
    last_drop_warn: Instant,
}

impl PoseIngest {
    pub fn new(
        config: &Config,
        transforms: FrameTransforms,
        pose_tx: mpsc::Sender<Pose>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let topics = vec![
            (config.pose_topic().to_string(), ObservationKind::Pose),
            (config.odom_topic().to_string(), ObservationKind::Odometry),
            (config.pose_with_covariance_topic().to_string(), ObservationKind::PoseWithCovariance),
        ];
        Self {
            topics,
            transforms,
            pose_tx,
            metrics,
            last_drop_warn: Instant::now() - Duration::from_secs(2),
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|(topic, _)| topic.as_str())
    }

    fn kind_for(&self, topic: &str) -> Option<ObservationKind> {
        self.topics.iter().find(|(t, _)| t == topic).map(|(_, kind)| *kind)
    }

    /// Parse, normalize and forward one observation
    pub fn handle_publish(&mut self, topic: &str, payload: &[u8]) -> IngestOutcome {
        let Some(kind) = self.kind_for(topic) else {
            debug!(topic = %topic, "mqtt_unexpected_topic");
            return IngestOutcome::Ignored;
        };
        self.metrics.record_observation_received();

        let pose = match self.normalize(kind, payload) {
            Some(pose) => pose,
            None => {
                self.metrics.record_observation_rejected();
                return IngestOutcome::Rejected;
            }
        };

        match self.pose_tx.try_send(pose) {
            Ok(()) => IngestOutcome::Forwarded,
            Err(TrySendError::Full(_)) => {
                self.metrics.record_observation_dropped();
                // Rate-limit warning to 1 per second
                if self.last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!("pose_dropped: channel full");
                    self.last_drop_warn = Instant::now();
                }
                IngestOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => IngestOutcome::Closed,
        }
    }

    fn normalize(&self, kind: ObservationKind, payload: &[u8]) -> Option<Pose> {
        let json = match std::str::from_utf8(payload) {
            Ok(json) => json,
            Err(e) => {
                debug!(kind = %kind.as_str(), error = %e, "observation_invalid_utf8");
                return None;
            }
        };

        let raw = match RawPose::parse(kind, json) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(kind = %kind.as_str(), error = %e, "observation_parse_failed");
                return None;
            }
        };

        match self.transforms.to_map(raw) {
            Ok(pose) => Some(pose),
            Err(e) => {
                debug!(kind = %kind.as_str(), error = %e, "observation_untransformable");
                None
            }
        }
    }
}

/// Start the MQTT client and feed normalized poses to the engine
///
/// Runs until shutdown or until the pose channel closes.
pub async fn start_mqtt_client(
    config: &Config,
    mut ingest: PoseIngest,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions = MqttOptions::new(config.mqtt_client_id(), config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    for topic in ingest.topics() {
        client.subscribe(topic, QoS::AtMostOnce).await?;
    }

    info!(
        pose = %config.pose_topic(),
        odom = %config.odom_topic(),
        pose_with_covariance = %config.pose_with_covariance_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_subscribed"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if ingest.handle_publish(&publish.topic, &publish.payload) == IngestOutcome::Closed {
                            warn!("pose_channel_closed");
                            return Ok(());
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
