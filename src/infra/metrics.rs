//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that resets anything (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only; never use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤250, ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, >128000
const BUCKET_BOUNDS: [u64; 10] = [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// Monotonic counters are never reset; the processing latency histogram and
/// the per-interval message count are swapped to zero by `report()`.
pub struct Metrics {
    messages_received: AtomicU64,
    messages_processed: AtomicU64,
    messages_failed: AtomicU64,
    messages_deleted: AtomicU64,
    receive_errors: AtomicU64,
    decode_errors: AtomicU64,
    unknown_messages: AtomicU64,
    /// Messages processed since last report (reset on report)
    processed_since_report: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    updates_applied: AtomicU64,
    updates_skipped: AtomicU64,
    not_registered: AtomicU64,
    gate_events_created: AtomicU64,
    gate_events_filtered: AtomicU64,
    gate_events_duplicate: AtomicU64,
    recognitions: AtomicU64,
    sessions_created: AtomicU64,
    session_failures: AtomicU64,
    gate_events_expired: AtomicU64,
    live_broadcasts: AtomicU64,
    live_dropped: AtomicU64,
    live_subscriber_dropped: AtomicU64,
    live_subscribers: AtomicU64,
    commands_published: AtomicU64,
    command_failures: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            messages_deleted: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            unknown_messages: AtomicU64::new(0),
            processed_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            updates_applied: AtomicU64::new(0),
            updates_skipped: AtomicU64::new(0),
            not_registered: AtomicU64::new(0),
            gate_events_created: AtomicU64::new(0),
            gate_events_filtered: AtomicU64::new(0),
            gate_events_duplicate: AtomicU64::new(0),
            recognitions: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            session_failures: AtomicU64::new(0),
            gate_events_expired: AtomicU64::new(0),
            live_broadcasts: AtomicU64::new(0),
            live_dropped: AtomicU64::new(0),
            live_subscriber_dropped: AtomicU64::new(0),
            live_subscribers: AtomicU64::new(0),
            commands_published: AtomicU64::new(0),
            command_failures: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_messages_received(&self, count: u64) {
        self.messages_received.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a message handled successfully with given latency
    #[inline]
    pub fn record_message_processed(&self, latency_us: u64) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.processed_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_message_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_message_deleted(&self) {
        self.messages_deleted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_message(&self) {
        self.unknown_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reconciler outcome (applied or skipped as stale/duplicate)
    #[inline]
    pub fn record_update(&self, applied: bool) {
        if applied {
            self.updates_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.updates_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_not_registered(&self) {
        self.not_registered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_event_created(&self) {
        self.gate_events_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_event_filtered(&self) {
        self.gate_events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_event_duplicate(&self) {
        self.gate_events_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_recognition(&self) {
        self.recognitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_failure(&self) {
        self.session_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_events_expired(&self, count: u64) {
        self.gate_events_expired.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_live_broadcast(&self) {
        self.live_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    /// Hand-off to the broadcast hub was full
    #[inline]
    pub fn record_live_dropped(&self) {
        self.live_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A single subscriber's buffer was full
    #[inline]
    pub fn record_live_subscriber_dropped(&self) {
        self.live_subscriber_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_live_subscribers(&self, count: u64) {
        self.live_subscribers.store(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command(&self, published: bool) {
        if published {
            self.commands_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.command_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn gate_events_created(&self) -> u64 {
        self.gate_events_created.load(Ordering::Relaxed)
    }

    pub fn live_dropped(&self) -> u64 {
        self.live_dropped.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let interval_count = self.processed_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let messages_per_sec = if elapsed.as_secs_f64() > 0.0 {
            interval_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if interval_count > 0 { latency_sum / interval_count } else { 0 };

        MetricsSummary {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_deleted: self.messages_deleted.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unknown_messages: self.unknown_messages.load(Ordering::Relaxed),
            messages_per_sec,
            avg_latency_us: avg_latency,
            max_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            updates_skipped: self.updates_skipped.load(Ordering::Relaxed),
            not_registered: self.not_registered.load(Ordering::Relaxed),
            gate_events_created: self.gate_events_created.load(Ordering::Relaxed),
            gate_events_filtered: self.gate_events_filtered.load(Ordering::Relaxed),
            gate_events_duplicate: self.gate_events_duplicate.load(Ordering::Relaxed),
            recognitions: self.recognitions.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            session_failures: self.session_failures.load(Ordering::Relaxed),
            gate_events_expired: self.gate_events_expired.load(Ordering::Relaxed),
            live_broadcasts: self.live_broadcasts.load(Ordering::Relaxed),
            live_dropped: self.live_dropped.load(Ordering::Relaxed),
            live_subscriber_dropped: self.live_subscriber_dropped.load(Ordering::Relaxed),
            live_subscribers: self.live_subscribers.load(Ordering::Relaxed),
            commands_published: self.commands_published.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub messages_deleted: u64,
    pub receive_errors: u64,
    pub decode_errors: u64,
    pub unknown_messages: u64,
    pub messages_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Processing latency histogram for the last interval
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub updates_applied: u64,
    pub updates_skipped: u64,
    pub not_registered: u64,
    pub gate_events_created: u64,
    pub gate_events_filtered: u64,
    pub gate_events_duplicate: u64,
    pub recognitions: u64,
    pub sessions_created: u64,
    pub session_failures: u64,
    pub gate_events_expired: u64,
    pub live_broadcasts: u64,
    pub live_dropped: u64,
    pub live_subscriber_dropped: u64,
    pub live_subscribers: u64,
    pub commands_published: u64,
    pub command_failures: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            received = %self.messages_received,
            processed = %self.messages_processed,
            failed = %self.messages_failed,
            msgs_per_sec = format!("{:.1}", self.messages_per_sec),
            p99_us = %self.lat_p99_us,
            applied = %self.updates_applied,
            skipped = %self.updates_skipped,
            gate_events = %self.gate_events_created,
            sessions = %self.sessions_created,
            expired = %self.gate_events_expired,
            subscribers = %self.live_subscribers,
            live_dropped = %self.live_dropped,
            "metrics"
        );
    }
}
