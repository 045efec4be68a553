//! Configuration-driven collector for arbitrary resource kinds
//!
//! One `ConfigurableCollector` exists per `CrdConfig`. Watch events mutate
//! its resource cache; a scrape runs the two-pass collection over a single
//! locked snapshot of that cache.

use super::cache::ResourceCache;
use super::config::CrdConfig;
use super::descriptor::{build_descriptors, MetricDescriptor};
use super::strategy::{common_label_values, count_samples, resource_samples};
use crate::error::Result;
use crate::exposition::{gauge_family, Sample};
use crate::lifecycle::{LifecycleGate, SyncHandle, SyncTracker};
use crate::observability::ExporterMetrics;
use crate::watch::{EventHandlerFuncs, WatchTarget};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Samples produced for one descriptor during a collection
#[derive(Debug)]
pub struct MetricSamples<'a> {
    pub descriptor: &'a MetricDescriptor,
    pub samples: Vec<Sample>,
}

/// Collector for one configured resource kind
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct ConfigurableCollector {
    inner: Arc<Inner>,
}

struct Inner {
    crd: CrdConfig,
    /// Name used in logs and self-metrics, e.g. `crd/kubeblocks-cluster`
    label: String,
    /// Common label paths in sorted label-name order
    common_paths: Vec<String>,
    descriptors: Vec<MetricDescriptor>,
    cache: ResourceCache,
    gate: LifecycleGate,
    sync: SyncTracker,
    sync_handles: Vec<SyncHandle>,
    metrics: ExporterMetrics,
}

impl ConfigurableCollector {
    /// Validate `crd` and build every descriptor up front.
    ///
    /// Fails fast on an invalid definition or unknown metric type.
    pub fn new(crd: CrdConfig, metric_prefix: &str, gate: LifecycleGate) -> Result<Self> {
        crd.validate()?;
        let descriptors = build_descriptors(&crd, metric_prefix)?;
        let common_paths = crd.common_labels.values().cloned().collect();

        let sync = SyncTracker::new();
        let scopes = crd.namespaces.len().max(1);
        let sync_handles = (0..scopes).map(|_| sync.register()).collect();

        debug!(
            crd = %crd.name,
            gvr = %crd.gvr,
            metrics = descriptors.len(),
            "Built configurable collector"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                label: format!("crd/{}", crd.name),
                crd,
                common_paths,
                descriptors,
                cache: ResourceCache::new(),
                gate,
                sync,
                sync_handles,
                metrics: ExporterMetrics::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.crd.name
    }

    pub fn config(&self) -> &CrdConfig {
        &self.inner.crd
    }

    /// Descriptors in configuration order, independent of cache contents
    pub fn descriptors(&self) -> &[MetricDescriptor] {
        &self.inner.descriptors
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.inner.cache
    }

    pub fn on_add(&self, obj: &Value) {
        self.inner.cache.upsert(obj);
        self.record_event("add");
    }

    /// Full replace under the same key; `old` is not consulted.
    pub fn on_update(&self, _old: &Value, new: &Value) {
        self.inner.cache.upsert(new);
        self.record_event("update");
    }

    pub fn on_delete(&self, obj: &Value) {
        self.inner.cache.remove(obj);
        self.record_event("delete");
    }

    fn record_event(&self, event: &str) {
        self.inner.metrics.inc_events(&self.inner.label, event);
        self.inner
            .metrics
            .set_cached_objects(&self.inner.label, self.inner.cache.len());
    }

    /// Callbacks for the watch layer, dropped while the gate is closed
    pub fn event_handler(&self) -> EventHandlerFuncs {
        let (add, update, delete) = (self.clone(), self.clone(), self.clone());
        EventHandlerFuncs::new()
            .on_add(move |obj| add.on_add(obj))
            .on_update(move |old, new| update.on_update(old, new))
            .on_delete(move |obj| delete.on_delete(obj))
            .gated(self.inner.label.clone(), self.inner.gate.clone())
    }

    /// One watch per configured namespace, or one cluster-wide watch
    pub fn watch_targets(&self) -> Vec<WatchTarget> {
        let mut handles = self.inner.sync_handles.iter().cloned();
        WatchTarget::for_namespaces(
            &self.inner.label,
            &self.inner.crd.gvr,
            &self.inner.crd.namespaces,
            &self.event_handler(),
            move || handles.next().unwrap_or_default(),
        )
    }

    pub fn has_synced(&self) -> bool {
        self.inner.sync.has_synced()
    }

    /// Scrapes are served only once synced and while the gate is open
    pub fn is_ready(&self) -> bool {
        self.inner.gate.may_run() && self.has_synced()
    }

    /// Run both passes over one snapshot of the cache.
    ///
    /// Per-resource metrics first, then aggregate `count` metrics. The
    /// shared lock is held until both passes finish.
    pub fn gather(&self) -> Vec<MetricSamples<'_>> {
        let descriptors = &self.inner.descriptors;
        let mut collected: Vec<Vec<Sample>> = vec![Vec::new(); descriptors.len()];

        let snapshot = self.inner.cache.snapshot();

        for obj in snapshot.objects() {
            let common = common_label_values(&self.inner.common_paths, obj);
            for (descriptor, out) in descriptors.iter().zip(collected.iter_mut()) {
                if !descriptor.kind.is_aggregate() {
                    resource_samples(descriptor, obj, &common, out);
                }
            }
        }

        for (descriptor, out) in descriptors.iter().zip(collected.iter_mut()) {
            if descriptor.kind.is_aggregate() {
                *out = count_samples(descriptor, snapshot.objects());
            }
        }

        drop(snapshot);

        descriptors
            .iter()
            .zip(collected)
            .map(|(descriptor, samples)| MetricSamples {
                descriptor,
                samples,
            })
            .collect()
    }
}

impl Collector for ConfigurableCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.inner.descriptors.iter().map(MetricDescriptor::desc).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        if !self.is_ready() {
            debug!(collector = %self.inner.label, "Not ready, skipping collection");
            return Vec::new();
        }

        let start = Instant::now();
        let families = self
            .gather()
            .into_iter()
            .filter(|metric| !metric.samples.is_empty())
            .map(|metric| {
                let d = metric.descriptor;
                gauge_family(&d.name, &d.help, &d.label_names, &metric.samples)
            })
            .collect();

        self.inner
            .metrics
            .observe_collect_duration(&self.inner.label, start.elapsed());
        families
    }
}
