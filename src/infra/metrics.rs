//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Observations received from any source (monotonic)
    observations_received: AtomicU64,
    /// Observations dropped because the pose queue was full (monotonic)
    observations_dropped: AtomicU64,
    /// Observations that failed to parse or transform (monotonic)
    observations_rejected: AtomicU64,
    /// Poses processed by the engine (monotonic)
    poses_total: AtomicU64,
    /// Poses since last report (reset on report)
    poses_since_report: AtomicU64,
    /// Sum of pose processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max pose processing latency (reset on report)
    latency_max_us: AtomicU64,
    /// Pose processing latency histogram (reset on report)
    latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// ENTER events emitted (monotonic)
    enter_events_total: AtomicU64,
    /// EXIT events emitted (monotonic)
    exit_events_total: AtomicU64,
    /// Events emitted without locations because correlation failed (monotonic)
    correlation_failures: AtomicU64,
    /// Registry or localization calls that failed (monotonic)
    registry_failures: AtomicU64,
    /// Device listing requests served (monotonic)
    device_requests_total: AtomicU64,
    /// Localization requests dispatched (monotonic)
    localization_requests_total: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            observations_received: AtomicU64::new(0),
            observations_dropped: AtomicU64::new(0),
            observations_rejected: AtomicU64::new(0),
            poses_total: AtomicU64::new(0),
            poses_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            enter_events_total: AtomicU64::new(0),
            exit_events_total: AtomicU64::new(0),
            correlation_failures: AtomicU64::new(0),
            registry_failures: AtomicU64::new(0),
            device_requests_total: AtomicU64::new(0),
            localization_requests_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_observation_received(&self) {
        self.observations_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_observation_dropped(&self) {
        self.observations_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_observation_rejected(&self) {
        self.observations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pose was processed with given latency (lock-free)
    #[inline]
    pub fn record_pose_processed(&self, latency_us: u64) {
        self.poses_total.fetch_add(1, Ordering::Relaxed);
        self.poses_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_enter_event(&self) {
        self.enter_events_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exit_event(&self) {
        self.exit_events_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_correlation_failure(&self) {
        self.correlation_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_registry_failure(&self) {
        self.registry_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_device_request(&self) {
        self.device_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_localization_request(&self) {
        self.localization_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poses_total(&self) -> u64 {
        self.poses_total.load(Ordering::Relaxed)
    }

    pub fn observations_dropped(&self) -> u64 {
        self.observations_dropped.load(Ordering::Relaxed)
    }

    pub fn registry_failures(&self) -> u64 {
        self.registry_failures.load(Ordering::Relaxed)
    }

    /// Snapshot counters and the current latency window without resetting anything
    pub fn snapshot(&self) -> MetricsSummary {
        let poses_count = self.poses_since_report.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.load(Ordering::Relaxed);
        let mut lat_buckets = [0u64; METRICS_NUM_BUCKETS];
        for (i, bucket) in self.latency_buckets.iter().enumerate() {
            lat_buckets[i] = bucket.load(Ordering::Relaxed);
        }

        MetricsSummary {
            avg_latency_us: if poses_count > 0 { latency_sum / poses_count } else { 0 },
            max_latency_us: self.latency_max_us.load(Ordering::Relaxed),
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            observations_received: self.observations_received.load(Ordering::Relaxed),
            observations_dropped: self.observations_dropped.load(Ordering::Relaxed),
            observations_rejected: self.observations_rejected.load(Ordering::Relaxed),
            poses_total: self.poses_total.load(Ordering::Relaxed),
            enter_events_total: self.enter_events_total.load(Ordering::Relaxed),
            exit_events_total: self.exit_events_total.load(Ordering::Relaxed),
            correlation_failures: self.correlation_failures.load(Ordering::Relaxed),
            registry_failures: self.registry_failures.load(Ordering::Relaxed),
            device_requests_total: self.device_requests_total.load(Ordering::Relaxed),
            localization_requests_total: self.localization_requests_total.load(Ordering::Relaxed),
            ..MetricsSummary::default()
        }
    }

    /// Generate a report and reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let poses_count = self.poses_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let poses_per_sec = if elapsed.as_secs_f64() > 0.0 {
            poses_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if poses_count > 0 { latency_sum / poses_count } else { 0 };

        MetricsSummary {
            poses_per_sec,
            avg_latency_us: avg_latency,
            max_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            ..self.snapshot()
        }
    }
}

/// Point-in-time view of the metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub observations_received: u64,
    pub observations_dropped: u64,
    pub observations_rejected: u64,
    pub poses_total: u64,
    pub poses_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub enter_events_total: u64,
    pub exit_events_total: u64,
    pub correlation_failures: u64,
    pub registry_failures: u64,
    pub device_requests_total: u64,
    pub localization_requests_total: u64,
}

impl MetricsSummary {
    /// Log the metrics summary
    pub fn log(&self) {
        info!(
            poses_total = %self.poses_total,
            poses_per_sec = format!("{:.1}", self.poses_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p99_us = %self.lat_p99_us,
            observations_dropped = %self.observations_dropped,
            observations_rejected = %self.observations_rejected,
            enter_events = %self.enter_events_total,
            exit_events = %self.exit_events_total,
            registry_failures = %self.registry_failures,
            "metrics"
        );
    }
}
