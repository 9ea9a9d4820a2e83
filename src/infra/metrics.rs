//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Fetch round-trip bucket boundaries (milliseconds)
const FETCH_BUCKET_BOUNDS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_FETCH_BUCKET_BOUNDS: [u64; 10] = FETCH_BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Engine phase values for the Prometheus gauge
pub const PHASE_UNFOCUSED: u64 = 0;
pub const PHASE_FOCUSED_NO_DATA: u64 = 1;
pub const PHASE_FOCUSED: u64 = 2;

/// Stream state values for the Prometheus gauge
pub const STREAM_DOWN: u64 = 0;
pub const STREAM_UP: u64 = 1;

#[inline]
fn bucket_index(bounds: &[u64; 10], value: u64) -> usize {
    bounds.partition_point(|&bound| bound < value)
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
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], bounds: &[u64; 10], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            // Overflow bucket reports 2x the last bound
            return bounds.get(i).copied().unwrap_or(bounds[9] * 2);
        }
    }
    bounds[9] * 2
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Engine events processed (monotonic)
    events_total: AtomicU64,
    /// Events since last report (reset on report)
    events_since_report: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Alerts decoded from the stream (monotonic)
    alerts_received: AtomicU64,
    /// Alerts that passed the focus filter
    alerts_accepted: AtomicU64,
    /// Undecodable stream payloads
    alerts_malformed: AtomicU64,
    /// Alerts dropped because the engine queue was full
    alerts_dropped: AtomicU64,
    resolutions_total: AtomicU64,
    resolutions_failed: AtomicU64,
    snapshots_applied: AtomicU64,
    /// Snapshot results discarded because focus moved on
    snapshots_stale: AtomicU64,
    snapshots_empty: AtomicU64,
    fetch_errors: AtomicU64,
    fetch_latency_buckets: [AtomicU64; NUM_BUCKETS],
    fetch_latency_sum_ms: AtomicU64,
    stream_connects: AtomicU64,
    stream_terminations: AtomicU64,
    stream_state: AtomicU64,
    phase: AtomicU64,
    history_len: AtomicU64,
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
            events_total: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            alerts_received: AtomicU64::new(0),
            alerts_accepted: AtomicU64::new(0),
            alerts_malformed: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
            resolutions_total: AtomicU64::new(0),
            resolutions_failed: AtomicU64::new(0),
            snapshots_applied: AtomicU64::new(0),
            snapshots_stale: AtomicU64::new(0),
            snapshots_empty: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            fetch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            fetch_latency_sum_ms: AtomicU64::new(0),
            stream_connects: AtomicU64::new(0),
            stream_terminations: AtomicU64::new(0),
            stream_state: AtomicU64::new(STREAM_DOWN),
            phase: AtomicU64::new(PHASE_UNFOCUSED),
            history_len: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an engine event was processed with given latency (lock-free)
    #[inline]
    pub fn record_event_processed(&self, latency_us: u64) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(&BUCKET_BOUNDS, latency_us)]
            .fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_alert_received(&self) {
        self.alerts_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_accepted(&self) {
        self.alerts_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_malformed(&self) {
        self.alerts_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_resolution(&self, found: bool) {
        self.resolutions_total.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.resolutions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_snapshot_applied(&self) {
        self.snapshots_applied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot_stale(&self) {
        self.snapshots_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot_empty(&self) {
        self.snapshots_empty.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a directory round trip (milliseconds)
    #[inline]
    pub fn record_fetch_latency(&self, latency_ms: u64) {
        self.fetch_latency_buckets[bucket_index(&FETCH_BUCKET_BOUNDS, latency_ms)]
            .fetch_add(1, Ordering::Relaxed);
        self.fetch_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_connected(&self) {
        self.stream_connects.fetch_add(1, Ordering::Relaxed);
        self.stream_state.store(STREAM_UP, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_terminated(&self) {
        self.stream_terminations.fetch_add(1, Ordering::Relaxed);
        self.stream_state.store(STREAM_DOWN, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_phase(&self, phase: u64) {
        self.phase.store(phase, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_history_len(&self, len: usize) {
        self.history_len.store(len as u64, Ordering::Relaxed);
    }

    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    pub fn alerts_received(&self) -> u64 {
        self.alerts_received.load(Ordering::Relaxed)
    }

    pub fn snapshots_stale(&self) -> u64 {
        self.snapshots_stale.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> u64 {
        self.phase.load(Ordering::Relaxed)
    }

    /// Snapshot the counters, resetting the per-interval ones
    pub fn report(&self) -> MetricsSummary {
        let events_count = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);
        let fetch_lat_buckets = swap_buckets(&self.fetch_latency_buckets);
        let fetch_sum = self.fetch_latency_sum_ms.swap(0, Ordering::Relaxed);
        let fetch_count: u64 = fetch_lat_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            events_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_process_latency_us = if events_count > 0 { latency_sum / events_count } else { 0 };

        MetricsSummary {
            events_total: self.events_total.load(Ordering::Relaxed),
            events_per_sec,
            avg_process_latency_us,
            max_process_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, &BUCKET_BOUNDS, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, &BUCKET_BOUNDS, 0.99),
            lat_buckets,
            fetch_avg_ms: if fetch_count > 0 { fetch_sum / fetch_count } else { 0 },
            fetch_p99_ms: percentile_from_buckets(&fetch_lat_buckets, &FETCH_BUCKET_BOUNDS, 0.99),
            fetch_lat_buckets,
            alerts_received: self.alerts_received.load(Ordering::Relaxed),
            alerts_accepted: self.alerts_accepted.load(Ordering::Relaxed),
            alerts_malformed: self.alerts_malformed.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            resolutions_total: self.resolutions_total.load(Ordering::Relaxed),
            resolutions_failed: self.resolutions_failed.load(Ordering::Relaxed),
            snapshots_applied: self.snapshots_applied.load(Ordering::Relaxed),
            snapshots_stale: self.snapshots_stale.load(Ordering::Relaxed),
            snapshots_empty: self.snapshots_empty.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            stream_connects: self.stream_connects.load(Ordering::Relaxed),
            stream_terminations: self.stream_terminations.load(Ordering::Relaxed),
            stream_state: self.stream_state.load(Ordering::Relaxed),
            phase: self.phase.load(Ordering::Relaxed),
            history_len: self.history_len.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub events_total: u64,
    pub events_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub fetch_lat_buckets: [u64; NUM_BUCKETS],
    pub fetch_avg_ms: u64,
    pub fetch_p99_ms: u64,
    pub alerts_received: u64,
    pub alerts_accepted: u64,
    pub alerts_malformed: u64,
    pub alerts_dropped: u64,
    pub resolutions_total: u64,
    pub resolutions_failed: u64,
    pub snapshots_applied: u64,
    pub snapshots_stale: u64,
    pub snapshots_empty: u64,
    pub fetch_errors: u64,
    pub stream_connects: u64,
    pub stream_terminations: u64,
    pub stream_state: u64,
    pub phase: u64,
    pub history_len: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_total = %self.events_total,
            events_per_sec = format!("{:.1}", self.events_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            p99_us = %self.lat_p99_us,
            alerts = %self.alerts_received,
            alerts_accepted = %self.alerts_accepted,
            alerts_malformed = %self.alerts_malformed,
            snapshots = %self.snapshots_applied,
            snapshots_stale = %self.snapshots_stale,
            fetch_errors = %self.fetch_errors,
            fetch_p99_ms = %self.fetch_p99_ms,
            stream_up = %(self.stream_state == STREAM_UP),
            history_len = %self.history_len,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.events_total(), 0);
        assert_eq!(metrics.phase(), PHASE_UNFOCUSED);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(&BUCKET_BOUNDS, 50), 0);
        assert_eq!(bucket_index(&BUCKET_BOUNDS, 100), 0);
        assert_eq!(bucket_index(&BUCKET_BOUNDS, 101), 1);
        assert_eq!(bucket_index(&BUCKET_BOUNDS, 1_000_000), 10);
    }

    #[test]
    fn test_report_resets_interval_counters() {
        let metrics = Metrics::new();
        metrics.record_event_processed(150);
        metrics.record_event_processed(250);
        metrics.record_alert_received();
        metrics.record_snapshot_stale();

        let summary = metrics.report();
        assert_eq!(summary.events_total, 2);
        assert_eq!(summary.avg_process_latency_us, 200);
        assert_eq!(summary.max_process_latency_us, 250);
        assert_eq!(summary.lat_buckets[1], 1);
        assert_eq!(summary.lat_buckets[2], 1);
        assert_eq!(summary.alerts_received, 1);
        assert_eq!(summary.snapshots_stale, 1);

        let summary = metrics.report();
        assert_eq!(summary.events_total, 2);
        assert_eq!(summary.max_process_latency_us, 0);
        assert_eq!(summary.lat_buckets.iter().sum::<u64>(), 0);
        // Monotonic counters survive the reset
        assert_eq!(summary.alerts_received, 1);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; NUM_BUCKETS];
        buckets[0] = 90;
        buckets[5] = 10;
        assert_eq!(percentile_from_buckets(&buckets, &BUCKET_BOUNDS, 0.50), 100);
        assert_eq!(percentile_from_buckets(&buckets, &BUCKET_BOUNDS, 0.99), 3200);
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], &BUCKET_BOUNDS, 0.99), 0);
    }

    #[test]
    fn test_stream_state_tracking() {
        let metrics = Metrics::new();
        metrics.record_stream_connected();
        assert_eq!(metrics.report().stream_state, STREAM_UP);
        metrics.record_stream_terminated();
        let summary = metrics.report();
        assert_eq!(summary.stream_state, STREAM_DOWN);
        assert_eq!(summary.stream_connects, 1);
        assert_eq!(summary.stream_terminations, 1);
    }
}
