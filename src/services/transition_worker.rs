//! Transition worker - correlates and emits transitions off the pose path
//!
//! The engine enqueues one `TransitionBatch` per membership change. The worker
//! resolves matched locations for each zone (exits first, then enters) and
//! hands the resulting events to the egress channel. Batches are processed one
//! at a time, so emission order follows pose order.
//!
//! The batch queue is unbounded so the engine never blocks on correlation;
//! it only grows while membership changes faster than the registry answers.
//! The egress queue is bounded and applies backpressure to this worker.

use crate::domain::types::{new_event_id, TransitionAction, TransitionEvent};
use crate::domain::zone::{Zone, ZoneRef};
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::EgressSender;
use crate::services::location_correlator::LocationCorrelator;
use crate::services::transition_engine::TransitionBatch;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Worker that turns transition batches into published events
pub struct TransitionWorker {
    correlator: Arc<LocationCorrelator>,
    egress: EgressSender,
    batch_rx: mpsc::UnboundedReceiver<TransitionBatch>,
    metrics: Arc<Metrics>,
}

impl TransitionWorker {
    pub fn new(
        correlator: Arc<LocationCorrelator>,
        egress: EgressSender,
        batch_rx: mpsc::UnboundedReceiver<TransitionBatch>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { correlator, egress, batch_rx, metrics }
    }

    /// Run the worker, processing batches until the channel closes
    pub async fn run(mut self) {
        info!("transition_worker_started");

        while let Some(batch) = self.batch_rx.recv().await {
            let start = Instant::now();
            let events = self.process_batch(&batch).await;
            let elapsed_us = start.elapsed().as_micros() as u64;

            if elapsed_us > 1_000_000 {
                warn!(events = %events, elapsed_us = %elapsed_us, "transition_batch_slow");
            }
        }

        info!("transition_worker_stopped");
    }

    /// Emit every event in `batch`, exits before enters; returns the count
    pub async fn process_batch(&self, batch: &TransitionBatch) -> usize {
        let exits = batch.exited.iter().map(|zone| (TransitionAction::Exit, zone));
        let enters = batch.entered.iter().map(|zone| (TransitionAction::Enter, zone));

        let mut emitted = 0;
        for (action, zone) in exits.chain(enters) {
            let event = self.build_event(action, zone, batch.stamp_ms).await;
            if !self.emit(event).await {
                break;
            }
            emitted += 1;
        }
        emitted
    }

    async fn build_event(&self, action: TransitionAction, zone: &Arc<Zone>, stamp_ms: u64) -> TransitionEvent {
        let (locations, correlation_error) =
            match self.correlator.matched_locations(&ZoneRef::Resolved(zone.clone())).await {
                Ok(locations) => (locations, None),
                Err(e) => {
                    self.metrics.record_correlation_failure();
                    warn!(
                        zone = %zone.name(),
                        action = %action.as_str(),
                        error = %e,
                        "transition_correlation_failed"
                    );
                    (Vec::new(), Some(e.to_string()))
                }
            };

        TransitionEvent {
            id: new_event_id(),
            action,
            zone: zone.info(),
            locations,
            stamp_ms,
            correlation_error,
        }
    }

    /// Returns false once the publisher is gone
    async fn emit(&self, event: TransitionEvent) -> bool {
        let action = event.action;
        let zone = event.zone.name.clone();
        let locations = event.locations.len();

        if !self.egress.send_transition(event).await {
            warn!(zone = %zone, action = %action.as_str(), "transition_egress_closed");
            return false;
        }

        match action {
            TransitionAction::Enter => self.metrics.record_enter_event(),
            TransitionAction::Exit => self.metrics.record_exit_event(),
        }
        info!(zone = %zone, action = %action.as_str(), locations = %locations, "transition_emitted");
        true
    }
}

/// Create a transition batch channel and worker
///
/// Returns the sender (for the engine) and the worker (to be spawned)
pub fn create_transition_worker(
    correlator: Arc<LocationCorrelator>,
    egress: EgressSender,
    metrics: Arc<Metrics>,
) -> (mpsc::UnboundedSender<TransitionBatch>, TransitionWorker) {
    let (batch_tx, batch_rx) = mpsc::unbounded_channel();
    let worker = TransitionWorker::new(correlator, egress, batch_rx, metrics);
    (batch_tx, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ControlDescriptor;
    use crate::domain::zone::{ZoneDefinition, ZoneSet};
    use crate::io::egress_channel::{create_egress_channel, EgressMessage};
    use crate::services::device_controls::DeviceControlCache;
    use crate::services::test_support::MockRegistry;
    use std::collections::HashMap;

    struct Harness {
        zones: Arc<ZoneSet>,
        registry: Arc<MockRegistry>,
        metrics: Arc<Metrics>,
        worker: TransitionWorker,
        egress_rx: mpsc::Receiver<EgressMessage>,
    }

    fn harness() -> Harness {
        harness_with_egress(16)
    }

    fn harness_with_egress(egress_capacity: usize) -> Harness {
        let square = |name: &str, x0: f64| ZoneDefinition {
            name: name.to_string(),
            frame_id: "map".to_string(),
            vertices: vec![[x0, 0.0], [x0 + 10.0, 0.0], [x0 + 10.0, 10.0], [x0, 10.0]],
        };
        let zones = Arc::new(ZoneSet::from_definitions(&[square("A", 0.0), square("B", 20.0)]).unwrap());

        let controls = HashMap::from([
            (
                "A".to_string(),
                vec![ControlDescriptor {
                    device_id: "lamp".to_string(),
                    control_id: "on".to_string(),
                    control: "Lamp".to_string(),
                }],
            ),
            (
                "B".to_string(),
                vec![ControlDescriptor {
                    device_id: "fan".to_string(),
                    control_id: "speed".to_string(),
                    control: "Fan".to_string(),
                }],
            ),
        ]);

        let registry = Arc::new(
            MockRegistry::new()
                .with_device("lamp", &[("on", 1.0)])
                .with_device("fan", &[("speed", 2.0)])
                .with_location("living", &["lamp"])
                .with_location("porch", &["fan"]),
        );
        let metrics = Arc::new(Metrics::new());
        let cache = Arc::new(DeviceControlCache::new(controls, registry.clone(), metrics.clone()));
        let correlator =
            Arc::new(LocationCorrelator::new(zones.clone(), cache, registry.clone(), metrics.clone()));

        let (egress, egress_rx) = create_egress_channel(egress_capacity, "test".to_string());
        let (_batch_tx, batch_rx) = mpsc::unbounded_channel();
        let worker = TransitionWorker::new(correlator, egress, batch_rx, metrics.clone());

        Harness { zones, registry, metrics, worker, egress_rx }
    }

    fn drain(rx: &mut mpsc::Receiver<EgressMessage>) -> Vec<TransitionEvent> {
        let mut events = Vec::new();
        while let Ok(EgressMessage::Transition(payload)) = rx.try_recv() {
            events.push(payload.event);
        }
        events
    }

    #[tokio::test]
    async fn test_exits_emitted_before_enters() {
        let mut h = harness();
        let batch = TransitionBatch {
            exited: vec![h.zones.get("A").unwrap()],
            entered: vec![h.zones.get("B").unwrap()],
            stamp_ms: 1234,
        };

        assert_eq!(h.worker.process_batch(&batch).await, 2);

        let events = drain(&mut h.egress_rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, TransitionAction::Exit);
        assert_eq!(events[0].zone.name, "A");
        assert_eq!(events[0].locations[0].location_id, "living");
        assert_eq!(events[1].action, TransitionAction::Enter);
        assert_eq!(events[1].zone.name, "B");
        assert_eq!(events[1].locations[0].location_id, "porch");
        assert!(events.iter().all(|e| e.stamp_ms == 1234));
        assert_ne!(events[0].id, events[1].id);

        let summary = h.metrics.snapshot();
        assert_eq!(summary.enter_events_total, 1);
        assert_eq!(summary.exit_events_total, 1);
    }

    #[tokio::test]
    async fn test_correlation_failure_still_emits() {
        let mut h = harness();
        h.registry.fail_locations(true);
        let batch = TransitionBatch { exited: vec![], entered: vec![h.zones.get("A").unwrap()], stamp_ms: 1 };

        h.worker.process_batch(&batch).await;

        let events = drain(&mut h.egress_rx);
        assert_eq!(events.len(), 1);
        assert!(events[0].locations.is_empty());
        assert!(events[0].correlation_error.as_deref().unwrap().contains("location registry down"));
        assert_eq!(h.metrics.snapshot().correlation_failures, 1);
    }

    #[tokio::test]
    async fn test_run_processes_batches_in_order() {
        let h = harness();
        let Harness { zones, metrics, mut egress_rx, worker, .. } = h;
        let TransitionWorker { correlator, egress, .. } = worker;

        let (batch_tx, worker) = create_transition_worker(correlator, egress, metrics);
        let handle = tokio::spawn(worker.run());

        batch_tx
            .send(TransitionBatch { exited: vec![], entered: vec![zones.get("A").unwrap()], stamp_ms: 1 })
            .unwrap();
        batch_tx
            .send(TransitionBatch { exited: vec![zones.get("A").unwrap()], entered: vec![], stamp_ms: 2 })
            .unwrap();
        drop(batch_tx);
        handle.await.unwrap();

        let events = drain(&mut egress_rx);
        let order: Vec<_> = events.iter().map(|e| (e.action, e.stamp_ms)).collect();
        assert_eq!(order, vec![(TransitionAction::Enter, 1), (TransitionAction::Exit, 2)]);
    }

    #[tokio::test]
    async fn test_small_egress_queue_delivers_every_event() {
        let h = harness_with_egress(1);
        let Harness { zones, metrics, mut egress_rx, worker, .. } = h;
        let batch = TransitionBatch {
            exited: vec![zones.get("A").unwrap()],
            entered: vec![zones.get("B").unwrap()],
            stamp_ms: 7,
        };

        let consumer = async {
            let mut events = Vec::new();
            while events.len() < 2 {
                let Some(EgressMessage::Transition(payload)) = egress_rx.recv().await else { break };
                events.push(payload.event);
            }
            events
        };
        let (emitted, events) = tokio::join!(worker.process_batch(&batch), consumer);

        assert_eq!(emitted, 2);
        let order: Vec<_> = events.iter().map(|e| (e.action, e.zone.name.as_str())).collect();
        assert_eq!(order, vec![(TransitionAction::Exit, "A"), (TransitionAction::Enter, "B")]);
        assert_eq!(metrics.snapshot().exit_events_total, 1);
        assert_eq!(metrics.snapshot().enter_events_total, 1);
    }

    #[tokio::test]
    async fn test_closed_egress_stops_batch() {
        let h = harness();
        let Harness { zones, metrics, worker, egress_rx, .. } = h;
        drop(egress_rx);
        let batch = TransitionBatch {
            exited: vec![zones.get("A").unwrap()],
            entered: vec![zones.get("B").unwrap()],
            stamp_ms: 7,
        };

        assert_eq!(worker.process_batch(&batch).await, 0);
        assert_eq!(metrics.snapshot().exit_events_total, 0);
    }
}
