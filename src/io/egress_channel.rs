//! Typed channel for MQTT egress messages
//!
//! Bounded channel between the transition worker and the MQTT publisher.
//! Senders wait for capacity instead of dropping, so a slow broker slows
//! the worker down but never loses a transition.

use crate::domain::types::TransitionEvent;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Zone ENTER/EXIT with its correlated locations
    Transition(TransitionPayload),
}

/// Transition event stamped with the site it came from
#[derive(Debug, Clone, Serialize)]
pub struct TransitionPayload {
    /// Site identifier
    pub site: String,
    #[serde(flatten)]
    pub event: TransitionEvent,
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    /// Create a new sender from an mpsc sender
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Queue a transition event for publishing
    ///
    /// Waits while the channel is full. Returns false only if the
    /// publisher has gone away.
    pub async fn send_transition(&self, event: TransitionEvent) -> bool {
        let payload = TransitionPayload { site: self.site_id.clone(), event };
        self.tx.send(EgressMessage::Transition(payload)).await.is_ok()
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// site_id is included in every payload for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
