//! Observability infrastructure for the exporter itself
//!
//! Provides:
//! - Prometheus self-metrics (events handled, cache size, collect latency, evictions)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Histogram buckets for collect latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ExporterMetricsInner> = OnceLock::new();

struct ExporterMetricsInner {
    events_total: IntCounterVec,
    cached_objects: IntGaugeVec,
    collect_duration_seconds: HistogramVec,
    aggregator_evictions_total: IntCounterVec,
    aggregator_buckets: IntGaugeVec,
}

impl ExporterMetricsInner {
    fn new() -> Self {
        Self {
            events_total: register_int_counter_vec!(
                "state_metrics_events_total",
                "Watch events applied to collector state",
                &["collector", "event"]
            )
            .expect("Failed to register events_total"),

            cached_objects: register_int_gauge_vec!(
                "state_metrics_cached_objects",
                "Objects currently held in a collector cache",
                &["collector"]
            )
            .expect("Failed to register cached_objects"),

            collect_duration_seconds: register_histogram_vec!(
                "state_metrics_collect_duration_seconds",
                "Time spent producing metrics for one scrape",
                &["collector"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collect_duration_seconds"),

            aggregator_evictions_total: register_int_counter_vec!(
                "state_metrics_aggregator_evictions_total",
                "Buckets dropped by capacity eviction or window cleanup",
                &["aggregator", "reason"]
            )
            .expect("Failed to register aggregator_evictions_total"),

            aggregator_buckets: register_int_gauge_vec!(
                "state_metrics_aggregator_buckets",
                "Live buckets per windowed aggregator",
                &["aggregator"]
            )
            .expect("Failed to register aggregator_buckets"),
        }
    }
}

/// Handle to the exporter's self-metrics
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    _private: (),
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ExporterMetricsInner {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new)
    }

    pub fn inc_events(&self, collector: &str, event: &str) {
        self.inner()
            .events_total
            .with_label_values(&[collector, event])
            .inc();
    }

    pub fn set_cached_objects(&self, collector: &str, count: usize) {
        self.inner()
            .cached_objects
            .with_label_values(&[collector])
            .set(count as i64);
    }

    pub fn observe_collect_duration(&self, collector: &str, elapsed: Duration) {
        self.inner()
            .collect_duration_seconds
            .with_label_values(&[collector])
            .observe(elapsed.as_secs_f64());
    }

    /// `reason` is `capacity` or `expired`
    pub fn inc_evictions(&self, aggregator: &str, reason: &str, count: usize) {
        self.inner()
            .aggregator_evictions_total
            .with_label_values(&[aggregator, reason])
            .inc_by(count as u64);
    }

    pub fn set_aggregator_buckets(&self, aggregator: &str, count: usize) {
        self.inner()
            .aggregator_buckets
            .with_label_values(&[aggregator])
            .set(count as i64);
    }
}

/// Structured logger for exporter lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log exporter startup
    pub fn log_startup(&self, version: &str, collectors: &[String]) {
        info!(
            event = "exporter_started",
            instance = %self.instance,
            version = %version,
            collectors = ?collectors,
            "State metrics exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            instance = %self.instance,
            reason = %reason,
            "State metrics exporter shutting down"
        );
    }

    pub fn log_collector_started(&self, collector: &str, watches: usize) {
        info!(
            event = "collector_started",
            instance = %self.instance,
            collector = %collector,
            watches = watches,
            "Collector started"
        );
    }

    /// Log completion of a collector's initial list
    pub fn log_cache_synced(&self, collector: &str, elapsed: Duration) {
        info!(
            event = "cache_synced",
            instance = %self.instance,
            collector = %collector,
            elapsed_ms = elapsed.as_millis() as u64,
            "Collector cache synced"
        );
    }

    pub fn log_watch_error(&self, collector: &str, resource: &str, error: &str) {
        warn!(
            event = "watch_error",
            instance = %self.instance,
            collector = %collector,
            resource = %resource,
            error = %error,
            "Watch stream error, retrying with backoff"
        );
    }

    /// Capacity eviction is expected degradation, not an error
    pub fn log_capacity_eviction(&self, aggregator: &str, key: &str, capacity: usize) {
        debug!(
            event = "capacity_eviction",
            instance = %self.instance,
            aggregator = %aggregator,
            key = %key,
            capacity = capacity,
            "Evicted least recently updated bucket"
        );
    }
}
