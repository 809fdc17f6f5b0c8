//! Zone membership state machine
//!
//! The engine is the only writer of `TransitionState`. It consumes normalized
//! poses from a single channel, diffs the new membership against the current
//! one and hands the resulting batch to the transition worker over an
//! unbounded queue. It never waits on registry calls or the broker, so slow
//! correlation cannot delay pose recognition and no batch is ever dropped.
//!
//! An empty membership leaves the state untouched by default: a pose outside
//! every zone is treated as a likely sensor gap, not as leaving. Set
//! `exit_on_empty` to make it fire EXIT for every current zone instead.

use crate::domain::types::Pose;
use crate::domain::zone::{Membership, Zone, ZoneSet};
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Zones exited and entered by a single pose, in emission order
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    pub exited: Vec<Arc<Zone>>,
    pub entered: Vec<Arc<Zone>>,
    /// Stamp of the pose that caused the batch (epoch ms)
    pub stamp_ms: u64,
}

impl TransitionBatch {
    pub fn is_empty(&self) -> bool {
        self.exited.is_empty() && self.entered.is_empty()
    }

    fn names(zones: &[Arc<Zone>]) -> Vec<&str> {
        zones.iter().map(|z| z.name()).collect()
    }
}

/// Current and previous membership
#[derive(Debug, Default)]
pub struct TransitionState {
    current: Membership,
    previous: Membership,
}

impl TransitionState {
    pub fn current(&self) -> &Membership {
        &self.current
    }

    pub fn previous(&self) -> &Membership {
        &self.previous
    }

    /// Apply a freshly computed membership
    ///
    /// Returns `None` when the membership is ignored (empty and
    /// `exit_on_empty` off), otherwise the exited/entered zones.
    pub fn apply(
        &mut self,
        membership: Membership,
        exit_on_empty: bool,
    ) -> Option<(Vec<Arc<Zone>>, Vec<Arc<Zone>>)> {
        if membership.is_empty() && !exit_on_empty {
            return None;
        }

        self.previous = std::mem::replace(&mut self.current, membership);

        let exited = self.previous.difference(&self.current);
        let entered = self.current.difference(&self.previous);
        Some((exited, entered))
    }
}

/// Single-owner membership tracker fed by the pose channel
pub struct TransitionEngine {
    zones: Arc<ZoneSet>,
    state: TransitionState,
    exit_on_empty: bool,
    batch_tx: mpsc::UnboundedSender<TransitionBatch>,
    membership_tx: watch::Sender<Vec<String>>,
    metrics: Arc<Metrics>,
}

impl TransitionEngine {
    pub fn new(
        zones: Arc<ZoneSet>,
        exit_on_empty: bool,
        batch_tx: mpsc::UnboundedSender<TransitionBatch>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (membership_tx, _) = watch::channel(Vec::new());
        Self {
            zones,
            state: TransitionState::default(),
            exit_on_empty,
            batch_tx,
            membership_tx,
            metrics,
        }
    }

    /// Receiver for the current membership (zone names)
    pub fn subscribe_membership(&self) -> watch::Receiver<Vec<String>> {
        self.membership_tx.subscribe()
    }

    pub fn state(&self) -> &TransitionState {
        &self.state
    }

    /// Consume poses until every sender is dropped
    pub async fn run(mut self, mut pose_rx: mpsc::Receiver<Pose>) {
        info!(zones = %self.zones.len(), exit_on_empty = %self.exit_on_empty, "transition_engine_started");

        while let Some(pose) = pose_rx.recv().await {
            self.handle_pose(&pose);
        }

        info!("transition_engine_stopped");
    }

    /// Process one pose and forward any resulting batch to the worker
    pub fn handle_pose(&mut self, pose: &Pose) {
        let start = Instant::now();

        if let Some(batch) = self.process_pose(pose) {
            self.dispatch(batch);
        }

        self.metrics.record_pose_processed(start.elapsed().as_micros() as u64);
    }

    /// Update membership for `pose` and compute the transition batch
    pub fn process_pose(&mut self, pose: &Pose) -> Option<TransitionBatch> {
        let membership = self.zones.in_which(pose.point);

        let Some((exited, entered)) = self.state.apply(membership, self.exit_on_empty) else {
            debug!(x = %pose.point.x, y = %pose.point.y, "pose_outside_all_zones");
            return None;
        };

        let batch = TransitionBatch { exited, entered, stamp_ms: pose.stamp_ms };
        if batch.is_empty() {
            return None;
        }

        let current = self.state.current.names();
        info!(
            exited = ?TransitionBatch::names(&batch.exited),
            entered = ?TransitionBatch::names(&batch.entered),
            current = ?current,
            "membership_changed"
        );
        self.membership_tx.send_replace(current);

        Some(batch)
    }

    fn dispatch(&self, batch: TransitionBatch) {
        if let Err(mpsc::error::SendError(batch)) = self.batch_tx.send(batch) {
            warn!(
                exited = ?TransitionBatch::names(&batch.exited),
                entered = ?TransitionBatch::names(&batch.entered),
                "transition_worker_channel_closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::zone::ZoneDefinition;

    fn square(name: &str, x0: f64, y0: f64) -> ZoneDefinition {
        ZoneDefinition {
            name: name.to_string(),
            frame_id: "map".to_string(),
            vertices: vec![[x0, y0], [x0 + 10.0, y0], [x0 + 10.0, y0 + 10.0], [x0, y0 + 10.0]],
        }
    }

    fn engine(exit_on_empty: bool) -> (TransitionEngine, mpsc::UnboundedReceiver<TransitionBatch>) {
        let zones =
            Arc::new(ZoneSet::from_definitions(&[square("A", 0.0, 0.0), square("B", 5.0, 5.0)]).unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        (TransitionEngine::new(zones, exit_on_empty, tx, Arc::new(Metrics::new())), rx)
    }

    fn names(zones: &[Arc<Zone>]) -> Vec<&str> {
        zones.iter().map(|z| z.name()).collect()
    }

    #[test]
    fn test_first_membership_enters_every_zone() {
        let (mut engine, _rx) = engine(false);
        let batch = engine.process_pose(&Pose::new(7.0, 7.0, "map")).unwrap();
        assert!(batch.exited.is_empty());
        assert_eq!(names(&batch.entered), vec!["A", "B"]);
    }

    #[test]
    fn test_overlap_scenario() {
        let (mut engine, _rx) = engine(false);

        // (7,7) is in both A and B
        let first = engine.process_pose(&Pose::new(7.0, 7.0, "map")).unwrap();
        assert_eq!(names(&first.entered), vec!["A", "B"]);

        // (20,20) is outside everything: ignored, state stays {A, B}
        assert!(engine.process_pose(&Pose::new(20.0, 20.0, "map")).is_none());
        assert_eq!(engine.state().current().names(), vec!["A", "B"]);

        // (12,12) is only in B: exactly one EXIT(A), no ENTER for B
        let third = engine.process_pose(&Pose::new(12.0, 12.0, "map")).unwrap();
        assert_eq!(names(&third.exited), vec!["A"]);
        assert!(third.entered.is_empty());
    }

    #[test]
    fn test_same_membership_produces_no_batch() {
        let (mut engine, _rx) = engine(false);
        engine.process_pose(&Pose::new(2.0, 2.0, "map")).unwrap();
        assert!(engine.process_pose(&Pose::new(3.0, 3.0, "map")).is_none());
        assert_eq!(engine.state().previous().names(), vec!["A"]);
    }

    #[test]
    fn test_exit_and_enter_in_one_pose() {
        let (mut engine, _rx) = engine(false);
        engine.process_pose(&Pose::new(2.0, 2.0, "map")).unwrap();

        let batch = engine.process_pose(&Pose::new(14.0, 14.0, "map")).unwrap();
        assert_eq!(names(&batch.exited), vec!["A"]);
        assert_eq!(names(&batch.entered), vec!["B"]);
    }

    #[test]
    fn test_exit_on_empty_leaves_all_zones() {
        let (mut engine, _rx) = engine(true);
        engine.process_pose(&Pose::new(7.0, 7.0, "map")).unwrap();

        let batch = engine.process_pose(&Pose::new(20.0, 20.0, "map")).unwrap();
        assert_eq!(names(&batch.exited), vec!["A", "B"]);
        assert!(engine.state().current().is_empty());

        // Re-entering after leaving everything fires ENTER again
        let back = engine.process_pose(&Pose::new(2.0, 2.0, "map")).unwrap();
        assert_eq!(names(&back.entered), vec!["A"]);
    }

    #[test]
    fn test_exit_on_empty_before_any_zone_is_quiet() {
        let (mut engine, _rx) = engine(true);
        assert!(engine.process_pose(&Pose::new(50.0, 50.0, "map")).is_none());
    }

    #[test]
    fn test_boundary_pose_is_outside() {
        let (mut engine, _rx) = engine(false);
        // (10, 7) lies on A's right edge and inside B
        let batch = engine.process_pose(&Pose::new(10.0, 7.0, "map")).unwrap();
        assert_eq!(names(&batch.entered), vec!["B"]);
    }

    #[test]
    fn test_membership_watch_updates() {
        let (mut engine, _rx) = engine(false);
        let membership = engine.subscribe_membership();
        assert!(membership.borrow().is_empty());

        engine.process_pose(&Pose::new(7.0, 7.0, "map"));
        assert_eq!(*membership.borrow(), vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_run_forwards_batches_in_order() {
        let (engine, mut batch_rx) = engine(false);
        let metrics = engine.metrics.clone();
        let (pose_tx, pose_rx) = mpsc::channel(16);

        let handle = tokio::spawn(engine.run(pose_rx));
        for (x, y) in [(7.0, 7.0), (20.0, 20.0), (12.0, 12.0)] {
            pose_tx.send(Pose::new(x, y, "map")).await.unwrap();
        }
        drop(pose_tx);
        handle.await.unwrap();

        let first = batch_rx.recv().await.unwrap();
        assert_eq!(names(&first.entered), vec!["A", "B"]);
        let second = batch_rx.recv().await.unwrap();
        assert_eq!(names(&second.exited), vec!["A"]);
        assert!(batch_rx.try_recv().is_err());
        assert_eq!(metrics.poses_total(), 3);
    }

    #[test]
    fn test_backlog_of_batches_is_kept() {
        let zones = Arc::new(ZoneSet::from_definitions(&[square("A", 0.0, 0.0)]).unwrap());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = TransitionEngine::new(zones, true, tx, Arc::new(Metrics::new()));

        // Worker not draining: every change must still be queued, in order
        for _ in 0..50 {
            engine.handle_pose(&Pose::new(2.0, 2.0, "map"));
            engine.handle_pose(&Pose::new(20.0, 20.0, "map"));
        }

        let mut count = 0;
        while let Ok(batch) = rx.try_recv() {
            if count % 2 == 0 {
                assert_eq!(names(&batch.entered), vec!["A"]);
            } else {
                assert_eq!(names(&batch.exited), vec!["A"]);
            }
            count += 1;
        }
        assert_eq!(count, 100);
    }

    #[test]
    fn test_closed_worker_channel_keeps_state() {
        let zones = Arc::new(ZoneSet::from_definitions(&[square("A", 0.0, 0.0)]).unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut engine = TransitionEngine::new(zones, true, tx, Arc::new(Metrics::new()));

        engine.handle_pose(&Pose::new(2.0, 2.0, "map"));
        assert_eq!(engine.state().current().names(), vec!["A"]);
    }
}
