//! Lock-free pipeline metrics
//!
//! Snap workers record from many tasks at once, so every counter is an
//! atomic. `report()` swaps the per-interval values out for a consistent
//! snapshot; totals are monotonic.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistics only and
//! must never drive control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential snap latency bucket boundaries (milliseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
pub const LATENCY_BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
pub const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    LATENCY_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

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

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket reports twice the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

pub struct Metrics {
    /// Raw records produced by the parsers
    records_parsed: AtomicU64,
    /// Records whose coordinates were not numeric
    records_skipped: AtomicU64,
    /// HTTP requests issued, retries included
    snap_requests: AtomicU64,
    snap_retries: AtomicU64,
    snap_succeeded: AtomicU64,
    snap_failed: AtomicU64,
    points_classified: AtomicU64,
    /// Snap latency histogram (reset on report)
    snap_latency_buckets: [AtomicU64; NUM_BUCKETS],
    snap_latency_sum_ms: AtomicU64,
    snap_latency_max_ms: AtomicU64,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            records_parsed: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            snap_requests: AtomicU64::new(0),
            snap_retries: AtomicU64::new(0),
            snap_succeeded: AtomicU64::new(0),
            snap_failed: AtomicU64::new(0),
            points_classified: AtomicU64::new(0),
            snap_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            snap_latency_sum_ms: AtomicU64::new(0),
            snap_latency_max_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_parsed(&self, count: u64) {
        self.records_parsed.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// One HTTP round trip against the routing service
    #[inline]
    pub fn record_snap_request(&self, latency_ms: u64) {
        self.snap_requests.fetch_add(1, Ordering::Relaxed);
        self.snap_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        self.snap_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.snap_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_snap_retry(&self) {
        self.snap_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snap_result(&self, success: bool) {
        if success {
            self.snap_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.snap_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_classified(&self, count: u64) {
        self.points_classified.fetch_add(count, Ordering::Relaxed);
    }

    /// Snapshot totals and drain the latency histogram
    pub fn report(&self) -> MetricsSummary {
        let buckets = swap_buckets(&self.snap_latency_buckets);
        let latency_sum = self.snap_latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.snap_latency_max_ms.swap(0, Ordering::Relaxed);
        let samples: u64 = buckets.iter().sum();

        MetricsSummary {
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            records_parsed: self.records_parsed.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            snap_requests: self.snap_requests.load(Ordering::Relaxed),
            snap_retries: self.snap_retries.load(Ordering::Relaxed),
            snap_succeeded: self.snap_succeeded.load(Ordering::Relaxed),
            snap_failed: self.snap_failed.load(Ordering::Relaxed),
            points_classified: self.points_classified.load(Ordering::Relaxed),
            snap_latency_avg_ms: if samples > 0 { latency_sum / samples } else { 0 },
            snap_latency_max_ms: latency_max,
            snap_latency_p50_ms: percentile_from_buckets(&buckets, 0.50),
            snap_latency_p99_ms: percentile_from_buckets(&buckets, 0.99),
            snap_latency_buckets: buckets,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub elapsed_ms: u64,
    pub records_parsed: u64,
    pub records_skipped: u64,
    pub snap_requests: u64,
    pub snap_retries: u64,
    pub snap_succeeded: u64,
    pub snap_failed: u64,
    pub points_classified: u64,
    pub snap_latency_avg_ms: u64,
    pub snap_latency_max_ms: u64,
    pub snap_latency_p50_ms: u64,
    pub snap_latency_p99_ms: u64,
    pub snap_latency_buckets: [u64; NUM_BUCKETS],
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            elapsed_ms = %self.elapsed_ms,
            records_parsed = %self.records_parsed,
            records_skipped = %self.records_skipped,
            snap_requests = %self.snap_requests,
            snap_retries = %self.snap_retries,
            snap_ok = %self.snap_succeeded,
            snap_failed = %self.snap_failed,
            classified = %self.points_classified,
            snap_avg_ms = %self.snap_latency_avg_ms,
            snap_p50_ms = %self.snap_latency_p50_ms,
            snap_p99_ms = %self.snap_latency_p99_ms,
            snap_max_ms = %self.snap_latency_max_ms,
            "metrics"
        );
    }
}
