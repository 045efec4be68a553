//! Event aggregation by namespace, reason and involved kind
//!
//! Events are folded into `namespace/reason/kind` buckets holding the total
//! occurrence count and the distinct involved objects. The bucket count is
//! capped; when full, the least recently updated bucket is evicted.

use super::cleanup::{CleanupLoop, WindowCleanup};
use super::clock::{Clock, SystemClock};
use super::decode;
use super::window::{retention, BucketMap};
use crate::dynamic::{metric_name, GvrConfig};
use crate::error::{ExporterError, Result};
use crate::exposition::{GaugeDesc, Sample};
use crate::lifecycle::{LifecycleGate, SyncHandle, SyncTracker};
use crate::observability::{ExporterMetrics, StructuredLogger};
use crate::registry::StateCollector;
use crate::watch::{EventHandlerFuncs, WatchTarget};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event;
use parking_lot::RwLock;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

pub const COLLECTOR_NAME: &str = "event";

/// Event collector configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventCollectorConfig {
    pub enabled: bool,
    /// Namespaces to watch; empty means all namespaces
    pub namespaces: Vec<String>,
    pub window_secs: u64,
    /// Upper bound on live buckets
    pub max_events: usize,
}

impl Default for EventCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespaces: Vec::new(),
            window_secs: 300,
            max_events: 1000,
        }
    }
}

/// Label dimensions of an event bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDims {
    pub namespace: String,
    pub reason: String,
    pub kind: String,
    /// `Normal` or `Warning`, taken from the event that created the bucket
    pub event_type: String,
}

/// Point-in-time view of one event bucket
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedEvents {
    pub namespace: String,
    pub reason: String,
    pub kind: String,
    pub event_type: String,
    pub count: u64,
    pub unique_objects: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

fn bucket_key(event: &Event) -> String {
    format!(
        "{}/{}/{}",
        event.metadata.namespace.as_deref().unwrap_or_default(),
        event.reason.as_deref().unwrap_or_default(),
        event.involved_object.kind.as_deref().unwrap_or_default(),
    )
}

fn dims_of(event: &Event) -> EventDims {
    EventDims {
        namespace: event.metadata.namespace.clone().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        kind: event.involved_object.kind.clone().unwrap_or_default(),
        event_type: event.type_.clone().unwrap_or_default(),
    }
}

/// Occurrences reported by the event, at least one
fn occurrences(event: &Event) -> u64 {
    event.count.unwrap_or(1).max(1) as u64
}

fn involved_name(event: &Event) -> &str {
    event.involved_object.name.as_deref().unwrap_or_default()
}

/// Windowed, capacity-bounded aggregator for events
pub struct EventAggregator {
    window: Duration,
    clock: Arc<dyn Clock>,
    buckets: RwLock<BucketMap<EventDims>>,
    metrics: ExporterMetrics,
    logger: StructuredLogger,
}

impl EventAggregator {
    pub fn new(window: Duration, max_events: usize) -> Self {
        Self::with_clock(window, max_events, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, max_events: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            buckets: RwLock::new(BucketMap::with_capacity_limit(max_events)),
            metrics: ExporterMetrics::new(),
            logger: StructuredLogger::new(COLLECTOR_NAME),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn add(&self, event: &Event) {
        self.contribute(event, occurrences(event));
    }

    /// Adds only the growth in occurrence count. An event whose bucket key
    /// changed contributes its full count to the new bucket.
    ///
    /// An unchanged count, as seen on every re-list, refreshes a live
    /// bucket and never recreates an expired or evicted one.
    pub fn update(&self, old: &Event, new: &Event) {
        let delta = if bucket_key(old) == bucket_key(new) {
            occurrences(new).saturating_sub(occurrences(old))
        } else {
            occurrences(new)
        };

        if delta == 0 {
            let now = self.clock.now();
            self.buckets
                .write()
                .refresh(&bucket_key(new), involved_name(new), now);
            return;
        }
        self.contribute(new, delta);
    }

    fn contribute(&self, event: &Event, delta: u64) {
        let now = self.clock.now();
        let key = bucket_key(event);

        let mut buckets = self.buckets.write();
        let contribution =
            buckets.add_occurrences(&key, || dims_of(event), involved_name(event), delta, now);

        if let Some(evicted) = contribution.evicted {
            let capacity = buckets.capacity().unwrap_or_default();
            self.logger
                .log_capacity_eviction(COLLECTOR_NAME, &evicted, capacity);
            self.metrics.inc_evictions(COLLECTOR_NAME, "capacity", 1);
        }
        self.metrics
            .set_aggregator_buckets(COLLECTOR_NAME, buckets.len());
    }

    /// Snapshot of every bucket, sorted by key dimensions
    pub fn aggregated(&self) -> Vec<AggregatedEvents> {
        let buckets = self.buckets.read();
        let mut events: Vec<AggregatedEvents> = buckets
            .iter()
            .map(|(_, bucket)| AggregatedEvents {
                namespace: bucket.dims.namespace.clone(),
                reason: bucket.dims.reason.clone(),
                kind: bucket.dims.kind.clone(),
                event_type: bucket.dims.event_type.clone(),
                count: bucket.count,
                unique_objects: bucket.members.len(),
                first_seen: bucket.first_seen,
                last_seen: bucket.last_seen,
            })
            .collect();
        events.sort_by(|a, b| {
            (&a.namespace, &a.reason, &a.kind).cmp(&(&b.namespace, &b.reason, &b.kind))
        });
        events
    }

    pub fn get(&self, namespace: &str, reason: &str, kind: &str) -> Option<AggregatedEvents> {
        self.aggregated()
            .into_iter()
            .find(|e| e.namespace == namespace && e.reason == reason && e.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WindowCleanup for EventAggregator {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    /// Drop buckets idle for more than two windows
    fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.write();
        let expired = buckets.cleanup(now, retention(self.window));

        for key in &expired {
            debug!(aggregator = COLLECTOR_NAME, key = %key, "Cleaned up aggregated event entry");
        }
        self.metrics
            .inc_evictions(COLLECTOR_NAME, "expired", expired.len());
        self.metrics
            .set_aggregator_buckets(COLLECTOR_NAME, buckets.len());
        expired.len()
    }
}

/// Exposes the event aggregator as metrics
#[derive(Clone)]
pub struct EventCollector {
    inner: Arc<Inner>,
}

struct Inner {
    config: EventCollectorConfig,
    aggregator: Arc<EventAggregator>,
    gate: LifecycleGate,
    sync: SyncTracker,
    sync_handles: Vec<SyncHandle>,
    count: GaugeDesc,
    unique: GaugeDesc,
    metrics: ExporterMetrics,
}

const LABELS: &[&str] = &["namespace", "reason", "kind", "type"];

impl EventCollector {
    pub fn from_config(
        config: &EventCollectorConfig,
        metric_prefix: &str,
        gate: &LifecycleGate,
    ) -> Result<Self> {
        if !config.enabled {
            return Err(ExporterError::CollectorDisabled(
                "event collector disabled".to_string(),
            ));
        }

        let aggregator = EventAggregator::new(
            Duration::from_secs(config.window_secs),
            config.max_events,
        );
        Self::new(config.clone(), Arc::new(aggregator), metric_prefix, gate.clone())
    }

    pub fn new(
        config: EventCollectorConfig,
        aggregator: Arc<EventAggregator>,
        metric_prefix: &str,
        gate: LifecycleGate,
    ) -> Result<Self> {
        let count = GaugeDesc::new(
            metric_name(metric_prefix, COLLECTOR_NAME, "aggregated_count"),
            "Event occurrences per namespace, reason and involved kind",
            LABELS,
        )?;
        let unique = GaugeDesc::new(
            metric_name(metric_prefix, COLLECTOR_NAME, "unique_objects"),
            "Distinct involved objects per namespace, reason and involved kind",
            LABELS,
        )?;

        let sync = SyncTracker::new();
        let scopes = config.namespaces.len().max(1);
        let sync_handles = (0..scopes).map(|_| sync.register()).collect();

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                aggregator,
                gate,
                sync,
                sync_handles,
                count,
                unique,
                metrics: ExporterMetrics::new(),
            }),
        })
    }

    pub fn aggregator(&self) -> &Arc<EventAggregator> {
        &self.inner.aggregator
    }

    pub fn is_ready(&self) -> bool {
        self.inner.gate.may_run() && self.inner.sync.has_synced()
    }

    /// Deletions are ignored; buckets age out through cleanup.
    fn event_handler(&self) -> EventHandlerFuncs {
        let (add, update) = (self.clone(), self.clone());
        EventHandlerFuncs::new()
            .on_add(move |obj| {
                if let Some(event) = decode::<Event>(COLLECTOR_NAME, obj) {
                    add.inner.aggregator.add(&event);
                    add.inner.metrics.inc_events(COLLECTOR_NAME, "add");
                }
            })
            .on_update(move |old, new| {
                let old = decode::<Event>(COLLECTOR_NAME, old);
                let new = decode::<Event>(COLLECTOR_NAME, new);
                if let (Some(old), Some(new)) = (old, new) {
                    update.inner.aggregator.update(&old, &new);
                    update.inner.metrics.inc_events(COLLECTOR_NAME, "update");
                }
            })
            .gated(COLLECTOR_NAME, self.inner.gate.clone())
    }
}

impl StateCollector for EventCollector {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    fn watch_targets(&self) -> Vec<WatchTarget> {
        let mut handles = self.inner.sync_handles.iter().cloned();
        WatchTarget::for_namespaces(
            COLLECTOR_NAME,
            &GvrConfig::new("", "v1", "events", "Event"),
            &self.inner.config.namespaces,
            &self.event_handler(),
            move || handles.next().unwrap_or_default(),
        )
    }

    fn has_synced(&self) -> bool {
        self.inner.sync.has_synced()
    }

    fn prometheus_collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![Box::new(self.clone())]
    }

    fn spawn_background(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let aggregator = Arc::clone(&self.inner.aggregator);
        let cleanup = CleanupLoop::new(aggregator.clone(), aggregator.window());
        vec![tokio::spawn(cleanup.run(shutdown.subscribe()))]
    }
}

impl Collector for EventCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![self.inner.count.desc(), self.inner.unique.desc()]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        if !self.is_ready() {
            return Vec::new();
        }

        let start = Instant::now();
        let buckets = self.inner.aggregator.aggregated();
        if buckets.is_empty() {
            return Vec::new();
        }

        let (counts, unique): (Vec<Sample>, Vec<Sample>) = buckets
            .into_iter()
            .map(|e| {
                let labels = vec![e.namespace, e.reason, e.kind, e.event_type];
                (
                    Sample::new(labels.clone(), e.count as f64),
                    Sample::new(labels, e.unique_objects as f64),
                )
            })
            .unzip();

        let families = vec![
            self.inner.count.family(&counts),
            self.inner.unique.family(&unique),
        ];
        self.inner
            .metrics
            .observe_collect_duration(COLLECTOR_NAME, start.elapsed());
        families
    }
}
