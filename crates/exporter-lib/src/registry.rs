//! Explicit collector registry
//!
//! Collectors are installed by name through [`CollectorRegistry::register_builtin`]
//! at startup, then built in the order the operator enabled them.

use crate::aggregate::{EventCollector, EventCollectorConfig, PodCollector, PodCollectorConfig};
use crate::dynamic::{CrdCollector, CrdCollectorConfig};
use crate::error::{ExporterError, Result};
use crate::lifecycle::LifecycleGate;
use crate::watch::WatchTarget;
use prometheus::core::Collector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A named source of metrics fed by one or more watches
pub trait StateCollector: Send + Sync {
    fn name(&self) -> &str;

    /// Resource streams this collector needs delivered
    fn watch_targets(&self) -> Vec<WatchTarget>;

    /// True once every watch has completed its initial list
    fn has_synced(&self) -> bool;

    /// Collectors to register with the Prometheus registry
    fn prometheus_collectors(&self) -> Vec<Box<dyn Collector>>;

    /// Start periodic work. Tasks exit when `shutdown` fires.
    fn spawn_background(&self, _shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        Vec::new()
    }
}

/// Per-collector configuration sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorsConfig {
    pub crd: CrdCollectorConfig,
    pub pod: PodCollectorConfig,
    pub event: EventCollectorConfig,
}

/// Everything a factory may use to build its collector
pub struct FactoryContext<'a> {
    pub metrics_namespace: &'a str,
    pub collectors: &'a CollectorsConfig,
    pub gate: &'a LifecycleGate,
}

pub type CollectorFactory = fn(&FactoryContext<'_>) -> Result<Box<dyn StateCollector>>;

/// Names mapped to collector constructors
#[derive(Default)]
pub struct CollectorRegistry {
    factories: BTreeMap<String, CollectorFactory>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every collector shipped with the exporter
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_builtin()?;
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, factory: CollectorFactory) -> Result<()> {
        if self.factories.contains_key(name) {
            return Err(ExporterError::DuplicateCollector(name.to_string()));
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn register_builtin(&mut self) -> Result<()> {
        self.register(crate::dynamic::COLLECTOR_NAME, build_crd)?;
        self.register(crate::aggregate::pod::COLLECTOR_NAME, build_pod)?;
        self.register(crate::aggregate::event::COLLECTOR_NAME, build_event)?;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the enabled collectors in the listed order.
    ///
    /// Unknown names and construction errors abort. A collector whose own
    /// configuration disables it is skipped.
    pub fn build(
        &self,
        enabled: &[String],
        ctx: &FactoryContext<'_>,
    ) -> Result<Vec<Box<dyn StateCollector>>> {
        let mut seen = HashSet::new();
        let mut built = Vec::with_capacity(enabled.len());

        for name in enabled {
            if !seen.insert(name.as_str()) {
                warn!(collector = %name, "Collector enabled more than once, ignoring repeat");
                continue;
            }

            let factory = self
                .factories
                .get(name)
                .ok_or_else(|| ExporterError::UnknownCollector(name.clone()))?;

            match factory(ctx) {
                Ok(collector) => built.push(collector),
                Err(ExporterError::CollectorDisabled(reason)) => {
                    info!(
                        collector = %name,
                        reason = %reason,
                        "Collector disabled by configuration"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(built)
    }
}

/// Wait until every collector reports synced, polling every `poll`.
///
/// Fails with `CacheSyncTimeout` naming the collectors still pending.
pub async fn wait_for_sync(
    collectors: &[Box<dyn StateCollector>],
    timeout: Duration,
    poll: Duration,
) -> Result<()> {
    let synced = tokio::time::timeout(timeout, async {
        while !collectors.iter().all(|c| c.has_synced()) {
            tokio::time::sleep(poll).await;
        }
    })
    .await;

    if synced.is_ok() {
        return Ok(());
    }

    let pending = collectors
        .iter()
        .filter(|c| !c.has_synced())
        .map(|c| c.name().to_string())
        .collect();
    Err(ExporterError::CacheSyncTimeout {
        collectors: pending,
        timeout_secs: timeout.as_secs(),
    })
}

fn build_crd(ctx: &FactoryContext<'_>) -> Result<Box<dyn StateCollector>> {
    let collector = CrdCollector::new(&ctx.collectors.crd, ctx.metrics_namespace, ctx.gate)?;
    Ok(Box::new(collector))
}

fn build_pod(ctx: &FactoryContext<'_>) -> Result<Box<dyn StateCollector>> {
    let collector =
        PodCollector::from_config(&ctx.collectors.pod, ctx.metrics_namespace, ctx.gate)?;
    Ok(Box::new(collector))
}

fn build_event(ctx: &FactoryContext<'_>) -> Result<Box<dyn StateCollector>> {
    let collector =
        EventCollector::from_config(&ctx.collectors.event, ctx.metrics_namespace, ctx.gate)?;
    Ok(Box::new(collector))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(config: &'a CollectorsConfig, gate: &'a LifecycleGate) -> FactoryContext<'a> {
        FactoryContext {
            metrics_namespace: "test",
            collectors: config,
            gate,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_builtin_names() {
        let registry = CollectorRegistry::with_builtin().unwrap();
        assert_eq!(registry.names(), vec!["crd", "event", "pod"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = CollectorRegistry::with_builtin().unwrap();
        let err = registry.register("crd", build_crd).unwrap_err();
        assert!(matches!(err, ExporterError::DuplicateCollector(name) if name == "crd"));
    }

    #[test]
    fn test_build_in_enabled_order() {
        let registry = CollectorRegistry::with_builtin().unwrap();
        let config = CollectorsConfig::default();
        let gate = LifecycleGate::open();

        let built = registry
            .build(&names(&["pod", "crd", "pod"]), &context(&config, &gate))
            .unwrap();
        let built: Vec<&str> = built.iter().map(|c| c.name()).collect();
        assert_eq!(built, vec!["pod", "crd"]);
    }

    #[test]
    fn test_unknown_collector_rejected() {
        let registry = CollectorRegistry::with_builtin().unwrap();
        let config = CollectorsConfig::default();
        let gate = LifecycleGate::open();

        let result = registry.build(&names(&["crd", "secrets"]), &context(&config, &gate));
        assert!(matches!(result, Err(ExporterError::UnknownCollector(name)) if name == "secrets"));
    }

    #[test]
    fn test_disabled_collector_skipped() {
        let registry = CollectorRegistry::with_builtin().unwrap();
        let mut config = CollectorsConfig::default();
        config.event.enabled = false;
        let gate = LifecycleGate::open();

        let built = registry
            .build(&names(&["crd", "pod", "event"]), &context(&config, &gate))
            .unwrap();
        assert_eq!(built.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_sync_completes_once_marked() {
        let registry = CollectorRegistry::with_builtin().unwrap();
        let config = CollectorsConfig::default();
        let gate = LifecycleGate::open();
        let built = registry
            .build(&names(&["pod", "event"]), &context(&config, &gate))
            .unwrap();

        let handles: Vec<_> = built
            .iter()
            .flat_map(|c| c.watch_targets())
            .map(|t| t.sync)
            .collect();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            for handle in handles {
                handle.mark_synced();
            }
        });

        wait_for_sync(&built, Duration::from_secs(30), Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_sync_times_out_with_pending_names() {
        let registry = CollectorRegistry::with_builtin().unwrap();
        let config = CollectorsConfig::default();
        let gate = LifecycleGate::open();
        let built = registry
            .build(&names(&["crd", "pod"]), &context(&config, &gate))
            .unwrap();

        let err = wait_for_sync(&built, Duration::from_secs(10), Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            ExporterError::CacheSyncTimeout {
                collectors,
                timeout_secs,
            } => {
                assert_eq!(collectors, vec!["pod"]);
                assert_eq!(timeout_secs, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_construction_error_aborts() {
        let registry = CollectorRegistry::with_builtin().unwrap();
        let config: CollectorsConfig = serde_json::from_value(serde_json::json!({
            "crd": {"crds": [{
                "name": "broken",
                "gvr": {"group": "x.io", "version": "v1", "resource": "things"},
                "metrics": [{"type": "histogram", "name": "h", "path": "spec.h"}]
            }]}
        }))
        .unwrap();
        let gate = LifecycleGate::open();

        let result = registry.build(&names(&["crd"]), &context(&config, &gate));
        assert!(matches!(result, Err(ExporterError::UnknownMetricType { .. })));
    }
}
