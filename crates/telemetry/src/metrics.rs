//! In-process pipeline metrics.
//!
//! Counters are process-global and monotonic; snapshots are logged by the
//! scheduler and exposed through the readiness endpoint.

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

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Latency histogram with fixed millisecond buckets.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 60s
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
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 60000];

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

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    /// Returns (upper bound, count) pairs.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the findings pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    // Event source
    pub findings_received: Counter,
    pub findings_rejected: Counter,
    pub findings_filtered: Counter,

    // Ingestion
    pub findings_stored: Counter,
    pub findings_updated: Counter,
    pub findings_stale: Counter,
    pub store_retries: Counter,
    pub dead_lettered: Counter,

    // Alerts
    pub alerts_dispatched: Counter,
    pub alerts_delivered: Counter,
    pub alert_delivery_failures: Counter,
    pub operational_alerts: Counter,

    // Archival
    pub records_archived: Counter,
    pub records_resumed: Counter,
    pub archival_failures: Counter,
    pub sweeps_completed: Counter,
    pub sweeps_checkpointed: Counter,
    pub ttl_expired: Counter,
    pub cold_objects_transitioned: Counter,
    pub cold_objects_expired: Counter,

    // Queries
    pub queries_served: Counter,
    pub queries_rejected: Counter,

    // Latency histograms
    pub ingest_latency_ms: Histogram,
    pub query_latency_ms: Histogram,
    pub sweep_duration_ms: Histogram,

    // Gauges
    pub consumer_offset: Gauge,
    pub alerts_in_flight: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            findings_received: self.findings_received.get(),
            findings_rejected: self.findings_rejected.get(),
            findings_filtered: self.findings_filtered.get(),
            findings_stored: self.findings_stored.get(),
            findings_updated: self.findings_updated.get(),
            findings_stale: self.findings_stale.get(),
            store_retries: self.store_retries.get(),
            dead_lettered: self.dead_lettered.get(),
            alerts_dispatched: self.alerts_dispatched.get(),
            alerts_delivered: self.alerts_delivered.get(),
            alert_delivery_failures: self.alert_delivery_failures.get(),
            records_archived: self.records_archived.get(),
            archival_failures: self.archival_failures.get(),
            sweeps_completed: self.sweeps_completed.get(),
            ttl_expired: self.ttl_expired.get(),
            ingest_latency_mean_ms: self.ingest_latency_ms.mean(),
            query_latency_mean_ms: self.query_latency_ms.mean(),
            sweep_duration_mean_ms: self.sweep_duration_ms.mean(),
        }
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub findings_received: u64,
    pub findings_rejected: u64,
    pub findings_filtered: u64,
    pub findings_stored: u64,
    pub findings_updated: u64,
    pub findings_stale: u64,
    pub store_retries: u64,
    pub dead_lettered: u64,
    pub alerts_dispatched: u64,
    pub alerts_delivered: u64,
    pub alert_delivery_failures: u64,
    pub records_archived: u64,
    pub archival_failures: u64,
    pub sweeps_completed: u64,
    pub ttl_expired: u64,
    pub ingest_latency_mean_ms: f64,
    pub query_latency_mean_ms: f64,
    pub sweep_duration_mean_ms: f64,
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
