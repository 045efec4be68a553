//! Pod aggregation by namespace and phase
//!
//! Pods fold into `namespace/phase` buckets instead of one series per pod.
//! Abnormal pods are additionally tracked by identity so the exporter can
//! report how long each one has been broken.

use super::cleanup::{CleanupLoop, WindowCleanup};
use super::clock::{Clock, SystemClock};
use super::decode;
use super::window::{retention, BucketMap};
use crate::dynamic::{metric_name, GvrConfig};
use crate::error::{ExporterError, Result};
use crate::exposition::{GaugeDesc, Sample};
use crate::lifecycle::{LifecycleGate, SyncHandle, SyncTracker};
use crate::observability::ExporterMetrics;
use crate::registry::StateCollector;
use crate::watch::{EventHandlerFuncs, WatchTarget};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use parking_lot::RwLock;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

pub const COLLECTOR_NAME: &str = "pod";

/// Pod collector configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodCollectorConfig {
    pub enabled: bool,
    /// Namespaces to watch; empty means all namespaces
    pub namespaces: Vec<String>,
    pub aggregator: PodAggregatorConfig,
}

impl Default for PodCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespaces: Vec::new(),
            aggregator: PodAggregatorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodAggregatorConfig {
    pub enabled: bool,
    pub window_secs: u64,
}

impl Default for PodAggregatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 300,
        }
    }
}

/// Label dimensions of a pod bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodDims {
    pub namespace: String,
    pub phase: String,
}

/// Point-in-time view of one pod bucket
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPods {
    pub namespace: String,
    pub phase: String,
    pub count: u64,
    /// Member pod names, sorted
    pub pods: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A pod currently considered abnormal
#[derive(Debug, Clone, PartialEq)]
pub struct AbnormalPod {
    pub namespace: String,
    pub name: String,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
struct AbnormalEntry {
    namespace: String,
    name: String,
    since: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PodState {
    buckets: BucketMap<PodDims>,
    /// `namespace/name` -> first time observed abnormal
    abnormal: HashMap<String, AbnormalEntry>,
}

fn namespace_of(pod: &Pod) -> &str {
    pod.metadata.namespace.as_deref().unwrap_or_default()
}

fn name_of(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

fn phase_of(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or_default()
}

fn bucket_key(pod: &Pod) -> String {
    format!("{}/{}", namespace_of(pod), phase_of(pod))
}

fn identity_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Failed or Unknown phase, Pending while unschedulable, or Running while
/// not ready.
pub fn is_pod_abnormal(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };

    let conditions = status.conditions.as_deref().unwrap_or_default();
    let condition_false = |kind: &str| {
        conditions
            .iter()
            .any(|c| c.type_ == kind && c.status == "False")
    };

    match status.phase.as_deref() {
        Some("Failed") | Some("Unknown") => true,
        Some("Pending") => condition_false("PodScheduled"),
        Some("Running") => condition_false("Ready"),
        _ => false,
    }
}

impl PodState {
    fn observe(&mut self, pod: &Pod, now: DateTime<Utc>) {
        let (namespace, name) = (namespace_of(pod), name_of(pod));

        self.buckets.add_member(
            &bucket_key(pod),
            || PodDims {
                namespace: namespace.to_string(),
                phase: phase_of(pod).to_string(),
            },
            name,
            now,
        );

        let key = identity_key(namespace, name);
        if is_pod_abnormal(pod) {
            self.abnormal.entry(key).or_insert_with(|| AbnormalEntry {
                namespace: namespace.to_string(),
                name: name.to_string(),
                since: now,
            });
        } else if self.abnormal.remove(&key).is_some() {
            debug!(namespace = %namespace, pod = %name, "Pod recovered");
        }
    }

    fn forget(&mut self, pod: &Pod) {
        let (namespace, name) = (namespace_of(pod), name_of(pod));
        self.buckets.remove_member(&bucket_key(pod), name);
        self.abnormal.remove(&identity_key(namespace, name));
    }
}

/// Windowed aggregator for pods
pub struct PodAggregator {
    window: Duration,
    clock: Arc<dyn Clock>,
    state: RwLock<PodState>,
    metrics: ExporterMetrics,
}

impl PodAggregator {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            state: RwLock::new(PodState::default()),
            metrics: ExporterMetrics::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn add(&self, pod: &Pod) {
        let now = self.clock.now();
        let mut state = self.state.write();
        state.observe(pod, now);
        self.metrics
            .set_aggregator_buckets(COLLECTOR_NAME, state.buckets.len());
    }

    /// Moves the pod between buckets when its phase changed. The abnormal
    /// timer keeps running unless the pod resolved.
    pub fn update(&self, old: &Pod, new: &Pod) {
        let now = self.clock.now();
        let mut state = self.state.write();

        let old_key = bucket_key(old);
        if old_key != bucket_key(new) {
            state.buckets.remove_member(&old_key, name_of(old));
        }
        state.observe(new, now);
        self.metrics
            .set_aggregator_buckets(COLLECTOR_NAME, state.buckets.len());
    }

    pub fn remove(&self, pod: &Pod) {
        let mut state = self.state.write();
        state.forget(pod);
        self.metrics
            .set_aggregator_buckets(COLLECTOR_NAME, state.buckets.len());
    }

    /// Time since the pod was first seen abnormal, zero if not tracked
    pub fn abnormal_duration(&self, namespace: &str, name: &str) -> Duration {
        let now = self.clock.now();
        self.state
            .read()
            .abnormal
            .get(&identity_key(namespace, name))
            .and_then(|entry| (now - entry.since).to_std().ok())
            .unwrap_or_default()
    }

    pub fn is_tracked_abnormal(&self, namespace: &str, name: &str) -> bool {
        self.state
            .read()
            .abnormal
            .contains_key(&identity_key(namespace, name))
    }

    /// Every tracked abnormal pod, sorted by namespace and name
    pub fn abnormal_pods(&self) -> Vec<AbnormalPod> {
        let now = self.clock.now();
        let mut pods: Vec<AbnormalPod> = self
            .state
            .read()
            .abnormal
            .values()
            .map(|entry| AbnormalPod {
                namespace: entry.namespace.clone(),
                name: entry.name.clone(),
                duration: (now - entry.since).to_std().unwrap_or_default(),
            })
            .collect();
        pods.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        pods
    }

    /// Snapshot of every bucket, sorted by namespace and phase
    pub fn aggregated(&self) -> Vec<AggregatedPods> {
        let state = self.state.read();
        let mut buckets: Vec<AggregatedPods> = state
            .buckets
            .iter()
            .map(|(_, bucket)| {
                let mut pods: Vec<String> = bucket.members.iter().cloned().collect();
                pods.sort();
                AggregatedPods {
                    namespace: bucket.dims.namespace.clone(),
                    phase: bucket.dims.phase.clone(),
                    count: bucket.count,
                    pods,
                    first_seen: bucket.first_seen,
                    last_seen: bucket.last_seen,
                }
            })
            .collect();
        buckets.sort_by(|a, b| (&a.namespace, &a.phase).cmp(&(&b.namespace, &b.phase)));
        buckets
    }

    pub fn get(&self, namespace: &str, phase: &str) -> Option<AggregatedPods> {
        self.aggregated()
            .into_iter()
            .find(|b| b.namespace == namespace && b.phase == phase)
    }

    pub fn len(&self) -> usize {
        self.state.read().buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WindowCleanup for PodAggregator {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    /// Drop buckets idle for more than two windows
    fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.write();
        let expired = state.buckets.cleanup(now, retention(self.window));

        for key in &expired {
            debug!(aggregator = COLLECTOR_NAME, key = %key, "Cleaned up aggregated pod entry");
        }
        self.metrics
            .inc_evictions(COLLECTOR_NAME, "expired", expired.len());
        self.metrics
            .set_aggregator_buckets(COLLECTOR_NAME, state.buckets.len());
        expired.len()
    }
}

/// Exposes the pod aggregator as metrics
#[derive(Clone)]
pub struct PodCollector {
    inner: Arc<Inner>,
}

struct Inner {
    config: PodCollectorConfig,
    aggregator: Arc<PodAggregator>,
    gate: LifecycleGate,
    sync: SyncTracker,
    sync_handles: Vec<SyncHandle>,
    count: GaugeDesc,
    abnormal: GaugeDesc,
    metrics: ExporterMetrics,
}

impl PodCollector {
    /// Fails with `CollectorDisabled` when the collector or its aggregator
    /// is switched off.
    pub fn from_config(
        config: &PodCollectorConfig,
        metric_prefix: &str,
        gate: &LifecycleGate,
    ) -> Result<Self> {
        if !config.enabled {
            return Err(ExporterError::CollectorDisabled(
                "pod collector disabled".to_string(),
            ));
        }
        if !config.aggregator.enabled {
            return Err(ExporterError::CollectorDisabled(
                "pod aggregator disabled".to_string(),
            ));
        }

        let window = Duration::from_secs(config.aggregator.window_secs);
        Self::new(
            config.clone(),
            Arc::new(PodAggregator::new(window)),
            metric_prefix,
            gate.clone(),
        )
    }

    pub fn new(
        config: PodCollectorConfig,
        aggregator: Arc<PodAggregator>,
        metric_prefix: &str,
        gate: LifecycleGate,
    ) -> Result<Self> {
        let count = GaugeDesc::new(
            metric_name(metric_prefix, COLLECTOR_NAME, "aggregated_count"),
            "Number of pods per namespace and phase",
            &["namespace", "phase"],
        )?;
        let abnormal = GaugeDesc::new(
            metric_name(metric_prefix, COLLECTOR_NAME, "abnormal_duration_seconds"),
            "Seconds since the pod was first observed in an abnormal state",
            &["namespace", "pod"],
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
                abnormal,
                metrics: ExporterMetrics::new(),
            }),
        })
    }

    pub fn aggregator(&self) -> &Arc<PodAggregator> {
        &self.inner.aggregator
    }

    pub fn is_ready(&self) -> bool {
        self.inner.gate.may_run() && self.inner.sync.has_synced()
    }

    fn event_handler(&self) -> EventHandlerFuncs {
        let (add, update, delete) = (self.clone(), self.clone(), self.clone());
        EventHandlerFuncs::new()
            .on_add(move |obj| {
                if let Some(pod) = decode::<Pod>(COLLECTOR_NAME, obj) {
                    add.inner.aggregator.add(&pod);
                    add.inner.metrics.inc_events(COLLECTOR_NAME, "add");
                }
            })
            .on_update(move |old, new| {
                let old = decode::<Pod>(COLLECTOR_NAME, old);
                let new = decode::<Pod>(COLLECTOR_NAME, new);
                if let (Some(old), Some(new)) = (old, new) {
                    update.inner.aggregator.update(&old, &new);
                    update.inner.metrics.inc_events(COLLECTOR_NAME, "update");
                }
            })
            .on_delete(move |obj| {
                if let Some(pod) = decode::<Pod>(COLLECTOR_NAME, obj) {
                    delete.inner.aggregator.remove(&pod);
                    delete.inner.metrics.inc_events(COLLECTOR_NAME, "delete");
                }
            })
            .gated(COLLECTOR_NAME, self.inner.gate.clone())
    }
}

impl StateCollector for PodCollector {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    fn watch_targets(&self) -> Vec<WatchTarget> {
        let mut handles = self.inner.sync_handles.iter().cloned();
        WatchTarget::for_namespaces(
            COLLECTOR_NAME,
            &GvrConfig::new("", "v1", "pods", "Pod"),
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

impl Collector for PodCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![self.inner.count.desc(), self.inner.abnormal.desc()]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        if !self.is_ready() {
            return Vec::new();
        }

        let start = Instant::now();
        let aggregator = &self.inner.aggregator;

        let counts: Vec<Sample> = aggregator
            .aggregated()
            .into_iter()
            .map(|b| Sample::new(vec![b.namespace, b.phase], b.count as f64))
            .collect();
        let durations: Vec<Sample> = aggregator
            .abnormal_pods()
            .into_iter()
            .map(|p| Sample::new(vec![p.namespace, p.name], p.duration.as_secs_f64()))
            .collect();

        let mut families = Vec::with_capacity(2);
        if !counts.is_empty() {
            families.push(self.inner.count.family(&counts));
        }
        if !durations.is_empty() {
            families.push(self.inner.abnormal.family(&durations));
        }

        self.inner
            .metrics
            .observe_collect_duration(COLLECTOR_NAME, start.elapsed());
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::clock::ManualClock;
    use serde_json::json;

    fn pod(name: &str, phase: &str, conditions: serde_json::Value) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": "default"},
            "status": {"phase": phase, "conditions": conditions}
        }))
        .unwrap()
    }

    #[test]
    fn test_abnormal_predicate() {
        assert!(is_pod_abnormal(&pod("a", "Failed", json!([]))));
        assert!(is_pod_abnormal(&pod("a", "Unknown", json!([]))));
        assert!(is_pod_abnormal(&pod(
            "a",
            "Pending",
            json!([{"type": "PodScheduled", "status": "False"}])
        )));
        assert!(!is_pod_abnormal(&pod(
            "a",
            "Pending",
            json!([{"type": "PodScheduled", "status": "True"}])
        )));
        assert!(is_pod_abnormal(&pod(
            "a",
            "Running",
            json!([{"type": "Ready", "status": "False"}])
        )));
        assert!(!is_pod_abnormal(&pod(
            "a",
            "Running",
            json!([{"type": "Ready", "status": "True"}])
        )));
        assert!(!is_pod_abnormal(&pod("a", "Succeeded", json!([]))));
        assert!(!is_pod_abnormal(&Pod::default()));
    }

    #[test]
    fn test_buckets_by_namespace_and_phase() {
        let aggregator = PodAggregator::new(Duration::from_secs(300));
        aggregator.add(&pod("a", "Running", json!([])));
        aggregator.add(&pod("b", "Running", json!([])));
        aggregator.add(&pod("b", "Running", json!([])));
        aggregator.add(&pod("c", "Failed", json!([])));

        let running = aggregator.get("default", "Running").unwrap();
        assert_eq!(running.count, 2);
        assert_eq!(running.pods, vec!["a", "b"]);
        assert_eq!(aggregator.get("default", "Failed").unwrap().count, 1);
        assert_eq!(aggregator.len(), 2);
    }

    #[test]
    fn test_update_moves_between_buckets() {
        let clock = Arc::new(ManualClock::default());
        let aggregator = PodAggregator::with_clock(Duration::from_secs(300), clock.clone());

        let pending = pod("a", "Pending", json!([{"type": "PodScheduled", "status": "False"}]));
        let running = pod("a", "Running", json!([{"type": "Ready", "status": "False"}]));
        let healthy = pod("a", "Running", json!([{"type": "Ready", "status": "True"}]));

        aggregator.add(&pending);
        clock.advance(chrono::Duration::seconds(30));
        aggregator.update(&pending, &running);

        assert!(aggregator.get("default", "Pending").is_none());
        assert_eq!(aggregator.get("default", "Running").unwrap().count, 1);
        assert_eq!(
            aggregator.abnormal_duration("default", "a"),
            Duration::from_secs(30)
        );

        aggregator.update(&running, &healthy);
        assert!(!aggregator.is_tracked_abnormal("default", "a"));
        assert_eq!(aggregator.abnormal_duration("default", "a"), Duration::ZERO);
    }

    #[test]
    fn test_remove_drops_empty_bucket() {
        let aggregator = PodAggregator::new(Duration::from_secs(300));
        let failed = pod("a", "Failed", json!([]));
        aggregator.add(&failed);
        assert!(aggregator.is_tracked_abnormal("default", "a"));

        aggregator.remove(&failed);
        assert!(aggregator.is_empty());
        assert!(aggregator.abnormal_pods().is_empty());
    }

    #[test]
    fn test_collector_exposes_counts_and_durations() {
        let clock = Arc::new(ManualClock::default());
        let aggregator = Arc::new(PodAggregator::with_clock(
            Duration::from_secs(300),
            clock.clone(),
        ));
        let collector = PodCollector::new(
            PodCollectorConfig::default(),
            aggregator.clone(),
            "test",
            LifecycleGate::open(),
        )
        .unwrap();

        let targets = collector.watch_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].gvr.resource, "pods");

        let obj = json!({
            "metadata": {"name": "web", "namespace": "prod"},
            "status": {"phase": "Failed"}
        });
        targets[0]
            .handler
            .handle(crate::watch::ResourceEvent::Added(&obj));
        clock.advance(chrono::Duration::seconds(45));

        assert!(collector.collect().is_empty());
        targets[0].sync.mark_synced();

        let families = collector.collect();
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].get_name(), "test_pod_aggregated_count");
        assert_eq!(families[0].get_metric()[0].get_gauge().get_value(), 1.0);
        assert_eq!(families[1].get_name(), "test_pod_abnormal_duration_seconds");
        assert_eq!(families[1].get_metric()[0].get_gauge().get_value(), 45.0);
    }

    #[test]
    fn test_disabled_configs() {
        let gate = LifecycleGate::open();
        let mut config = PodCollectorConfig::default();
        config.aggregator.enabled = false;
        assert!(matches!(
            PodCollector::from_config(&config, "", &gate),
            Err(ExporterError::CollectorDisabled(_))
        ));

        config = PodCollectorConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(matches!(
            PodCollector::from_config(&config, "", &gate),
            Err(ExporterError::CollectorDisabled(_))
        ));
    }
}
