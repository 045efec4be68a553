//! Configuration-driven metrics for arbitrary resource kinds
//!
//! This module turns a declarative `CrdConfig` into Prometheus metrics:
//! fail-soft path extraction over generic object trees, a small vocabulary
//! of metric types, and a resource cache read under one snapshot per scrape.

mod cache;
mod collector;
mod config;
mod descriptor;
mod extract;
mod strategy;


pub use cache::{CacheSnapshot, ResourceCache};
pub use collector::{ConfigurableCollector, MetricSamples};
pub use config::{
    ConditionConfig, ConditionFields, CrdCollectorConfig, CrdConfig, GvrConfig, MetricConfig,
    MetricKind,
};
pub use descriptor::{build_descriptors, metric_name, MetricDescriptor};
pub use extract::{
    extract_float, extract_map, extract_slice, extract_string, lookup, resource_key,
    sanitize_name, to_float,
};
pub use strategy::{common_label_values, count_samples, resource_samples};

use crate::error::Result;
use crate::lifecycle::LifecycleGate;
use crate::registry::StateCollector;
use crate::watch::WatchTarget;
use prometheus::core::Collector;

/// Name of the CRD collector in the registry
pub const COLLECTOR_NAME: &str = "crd";

/// All configured CRD collectors, managed as one registry entry
pub struct CrdCollector {
    collectors: Vec<ConfigurableCollector>,
}

impl CrdCollector {
    /// Build one collector per CRD. The first invalid definition aborts.
    pub fn new(
        config: &CrdCollectorConfig,
        metric_prefix: &str,
        gate: &LifecycleGate,
    ) -> Result<Self> {
        let collectors = config
            .crds
            .iter()
            .cloned()
            .map(|crd| ConfigurableCollector::new(crd, metric_prefix, gate.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { collectors })
    }

    pub fn collectors(&self) -> &[ConfigurableCollector] {
        &self.collectors
    }
}

impl StateCollector for CrdCollector {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    fn watch_targets(&self) -> Vec<WatchTarget> {
        self.collectors
            .iter()
            .flat_map(ConfigurableCollector::watch_targets)
            .collect()
    }

    fn has_synced(&self) -> bool {
        self.collectors.iter().all(ConfigurableCollector::has_synced)
    }

    fn prometheus_collectors(&self) -> Vec<Box<dyn Collector>> {
        self.collectors
            .iter()
            .filter(|c| !c.descriptors().is_empty())
            .map(|c| Box::new(c.clone()) as Box<dyn Collector>)
            .collect()
    }
}
