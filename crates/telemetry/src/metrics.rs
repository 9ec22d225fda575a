//! Internal metrics collection.
//!
//! Lock-free counters shared by every limiter in the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the cardinality limiter.
#[derive(Debug, Default)]
pub struct Metrics {
    // Limiter metrics
    pub batches_checked: Counter,
    pub records_checked: Counter,
    pub records_sampled: Counter,
    pub unit_hashes_requested: Counter,
    pub unit_hashes_rejected: Counter,
    pub records_removed: Counter,
    pub invalid_quota_rules: Counter,

    // Backend metrics
    pub backend_checks: Counter,
    pub backend_check_failures: Counter,
    pub backend_check_timeouts: Counter,
    pub backend_commits: Counter,
    pub backend_commit_failures: Counter,

    // Worker metrics
    pub batches_forwarded: Counter,
    pub records_forwarded: Counter,
    pub sink_errors: Counter,

    // Latency histograms
    pub backend_check_latency_ms: Histogram,
    pub backend_commit_latency_ms: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub batches_checked: u64,
    pub records_checked: u64,
    pub records_sampled: u64,
    pub unit_hashes_requested: u64,
    pub unit_hashes_rejected: u64,
    pub records_removed: u64,
    pub invalid_quota_rules: u64,
    pub backend_checks: u64,
    pub backend_check_failures: u64,
    pub backend_check_timeouts: u64,
    pub backend_commits: u64,
    pub backend_commit_failures: u64,
    pub batches_forwarded: u64,
    pub records_forwarded: u64,
    pub sink_errors: u64,
    pub backend_check_latency_mean_ms: f64,
    pub backend_commit_latency_mean_ms: f64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            batches_checked: self.batches_checked.get(),
            records_checked: self.records_checked.get(),
            records_sampled: self.records_sampled.get(),
            unit_hashes_requested: self.unit_hashes_requested.get(),
            unit_hashes_rejected: self.unit_hashes_rejected.get(),
            records_removed: self.records_removed.get(),
            invalid_quota_rules: self.invalid_quota_rules.get(),
            backend_checks: self.backend_checks.get(),
            backend_check_failures: self.backend_check_failures.get(),
            backend_check_timeouts: self.backend_check_timeouts.get(),
            backend_commits: self.backend_commits.get(),
            backend_commit_failures: self.backend_commit_failures.get(),
            batches_forwarded: self.batches_forwarded.get(),
            records_forwarded: self.records_forwarded.get(),
            sink_errors: self.sink_errors.get(),
            backend_check_latency_mean_ms: self.backend_check_latency_ms.mean(),
            backend_commit_latency_mean_ms: self.backend_commit_latency_ms.mean(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
