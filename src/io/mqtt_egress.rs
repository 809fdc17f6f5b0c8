//! MQTT publisher for egress events
//!
//! Publishes zone transitions to the configured transition topic with QoS 1
//! and the retain flag set, so a late subscriber still sees the most recent
//! transition.
//!
//! The publisher stops only when every `EgressSender` is gone, which happens
//! after the transition worker has finished its last batch. It then sends
//! DISCONNECT so requests already handed to the event loop reach the broker.

use crate::infra::config::Config;
use crate::io::egress_channel::{EgressMessage, TransitionPayload};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    transition_topic: String,
    eventloop: JoinHandle<()>,
}

/// Upper bound on waiting for the event loop to flush after DISCONNECT
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("{}-egress-{}", config.mqtt_client_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        let eventloop = tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("mqtt_egress_disconnected");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, rx, transition_topic: config.transition_topic().to_string(), eventloop }
    }

    /// Publish until the egress channel closes, then disconnect
    pub async fn run(mut self) {
        info!(transitions = %self.transition_topic, "mqtt_egress_started");

        while let Some(msg) = self.rx.recv().await {
            self.publish_message(msg).await;
        }

        info!("mqtt_egress_channel_closed");
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "mqtt_egress_disconnect_failed");
        }
        match tokio::time::timeout(DISCONNECT_TIMEOUT, self.eventloop).await {
            Ok(_) => info!("mqtt_egress_stopped"),
            Err(_) => warn!(timeout_secs = %DISCONNECT_TIMEOUT.as_secs(), "mqtt_egress_disconnect_timeout"),
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Transition(payload) => self.publish_transition(&payload).await,
        }
    }

    async fn publish_transition(&self, payload: &TransitionPayload) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "mqtt_egress_encode_failed");
                return;
            }
        };

        // Retained so the last transition is latched for late subscribers
        if let Err(e) =
            self.client.publish(&self.transition_topic, QoS::AtLeastOnce, true, json.into_bytes()).await
        {
            error!(
                zone = %payload.event.zone.name,
                action = %payload.event.action.as_str(),
                error = %e,
                "mqtt_egress_transition_failed"
            );
        }
    }
}
