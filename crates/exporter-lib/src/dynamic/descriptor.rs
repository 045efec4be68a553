//! Metric descriptor construction
//!
//! Descriptors are computed once per collector from configuration alone, so
//! they exist before any resource has been observed. Label order is fixed
//! here and must match the order strategies produce label values in.

use super::config::{CrdConfig, MetricConfig, MetricKind};
use super::extract::sanitize_name;
use crate::error::{ExporterError, Result};
use prometheus::core::Desc;
use std::collections::{HashMap, HashSet};

const DEFAULT_VALUE_LABEL: &str = "value";
const DEFAULT_KEY_LABEL: &str = "key";
const STATE_LABEL: &str = "state";
const CONDITION_LABELS: [&str; 3] = ["type", "status", "reason"];

/// Stable identity of one configured metric family
#[derive(Debug, Clone)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    /// The definition this descriptor was built from
    pub config: MetricConfig,
    pub(crate) desc: Desc,
}

impl MetricDescriptor {
    pub fn desc(&self) -> &Desc {
        &self.desc
    }
}

/// `prefix_crdname_metricname`, sanitized. An empty prefix is omitted.
pub fn metric_name(prefix: &str, crd_name: &str, metric: &str) -> String {
    let raw = [prefix, crd_name, metric]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_");
    sanitize_name(&raw)
}

/// Build descriptors for every metric of `crd`, in configuration order.
///
/// Fails on the first unknown metric type, invalid name/label set, or two
/// metrics that resolve to the same final name.
pub fn build_descriptors(crd: &CrdConfig, prefix: &str) -> Result<Vec<MetricDescriptor>> {
    let common: Vec<String> = crd.common_labels.keys().cloned().collect();
    let mut names = HashSet::with_capacity(crd.metrics.len());

    crd.metrics
        .iter()
        .map(|metric| {
            let descriptor = build_descriptor(crd, prefix, &common, metric)?;
            if !names.insert(descriptor.name.clone()) {
                return Err(ExporterError::InvalidCrd {
                    crd: crd.name.clone(),
                    reason: format!(
                        "metric {:?} duplicates metric name {}",
                        metric.name, descriptor.name
                    ),
                });
            }
            Ok(descriptor)
        })
        .collect()
}

fn build_descriptor(
    crd: &CrdConfig,
    prefix: &str,
    common: &[String],
    metric: &MetricConfig,
) -> Result<MetricDescriptor> {
    let kind: MetricKind = metric
        .kind
        .parse()
        .map_err(|kind| ExporterError::UnknownMetricType {
            crd: crd.name.clone(),
            metric: metric.name.clone(),
            kind,
        })?;

    let label_names = label_names(kind, common, metric);
    let name = metric_name(prefix, &crd.name, &metric.name);
    let help = if metric.help.is_empty() {
        format!("{} {} of {}", metric.name, kind, crd.name)
    } else {
        metric.help.clone()
    };

    let desc = Desc::new(name.clone(), help.clone(), label_names.clone(), HashMap::new())
        .map_err(|source| ExporterError::InvalidDescriptor {
            crd: crd.name.clone(),
            metric: metric.name.clone(),
            source,
        })?;

    Ok(MetricDescriptor {
        name,
        help,
        kind,
        label_names,
        config: metric.clone(),
        desc,
    })
}

fn label_names(kind: MetricKind, common: &[String], metric: &MetricConfig) -> Vec<String> {
    let key_label = || {
        if metric.key_label.is_empty() {
            DEFAULT_KEY_LABEL.to_string()
        } else {
            metric.key_label.clone()
        }
    };

    let mut names = Vec::with_capacity(common.len() + 3);
    match kind {
        MetricKind::Count => {
            let value_label = if metric.value_label.is_empty() {
                DEFAULT_VALUE_LABEL
            } else {
                &metric.value_label
            };
            names.push(value_label.to_string());
        }
        MetricKind::Info => {
            names.extend_from_slice(common);
            names.extend(metric.labels.keys().cloned());
        }
        MetricKind::Gauge => names.extend_from_slice(common),
        MetricKind::MapState => {
            names.extend_from_slice(common);
            names.push(key_label());
            names.push(STATE_LABEL.to_string());
        }
        MetricKind::MapGauge => {
            names.extend_from_slice(common);
            names.push(key_label());
        }
        MetricKind::Conditions => {
            names.extend_from_slice(common);
            names.extend(CONDITION_LABELS.iter().map(|l| l.to_string()));
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::config::GvrConfig;
    use std::collections::BTreeMap;

    fn metric(kind: &str, name: &str) -> MetricConfig {
        MetricConfig {
            kind: kind.to_string(),
            name: name.to_string(),
            help: format!("{name} help"),
            ..Default::default()
        }
    }

    fn crd(metrics: Vec<MetricConfig>) -> CrdConfig {
        CrdConfig {
            name: "test-crd".to_string(),
            gvr: GvrConfig::new("apps.example.com", "v1", "apps", "App"),
            common_labels: BTreeMap::from([
                ("namespace".to_string(), "metadata.namespace".to_string()),
                ("name".to_string(), "metadata.name".to_string()),
            ]),
            metrics,
            ..Default::default()
        }
    }

    #[test]
    fn test_metric_name_prefix_handling() {
        assert_eq!(metric_name("sealos", "test-crd", "value"), "sealos_test_crd_value");
        assert_eq!(metric_name("", "test-crd", "value"), "test_crd_value");
        assert_eq!(metric_name("Acme", "My.CRD", "Phase"), "acme_my_crd_phase");
    }

    #[test]
    fn test_label_order_per_kind() {
        let mut info = metric("info", "info");
        info.labels = BTreeMap::from([
            ("version".to_string(), "spec.version".to_string()),
            ("type".to_string(), "spec.type".to_string()),
        ]);
        let mut count = metric("count", "phase_count");
        count.value_label = "phase".to_string();
        let mut map_state = metric("map_state", "component_status");
        map_state.key_label = "component".to_string();

        let descs = build_descriptors(
            &crd(vec![
                info,
                count,
                metric("gauge", "replicas"),
                map_state,
                metric("map_gauge", "component_replicas"),
                metric("conditions", "condition"),
            ]),
            "test",
        )
        .unwrap();

        let labels: Vec<Vec<&str>> = descs
            .iter()
            .map(|d| d.label_names.iter().map(String::as_str).collect())
            .collect();

        assert_eq!(labels[0], ["name", "namespace", "type", "version"]);
        assert_eq!(labels[1], ["phase"]);
        assert_eq!(labels[2], ["name", "namespace"]);
        assert_eq!(labels[3], ["name", "namespace", "component", "state"]);
        assert_eq!(labels[4], ["name", "namespace", "key"]);
        assert_eq!(labels[5], ["name", "namespace", "type", "status", "reason"]);
    }

    #[test]
    fn test_count_defaults_value_label() {
        let descs = build_descriptors(&crd(vec![metric("count", "total")]), "").unwrap();
        assert_eq!(descs[0].label_names, vec!["value".to_string()]);
        assert_eq!(descs[0].name, "test_crd_total");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = build_descriptors(&crd(vec![metric("histogram", "latency")]), "x").unwrap_err();
        match err {
            ExporterError::UnknownMetricType { crd, metric, kind } => {
                assert_eq!(crd, "test-crd");
                assert_eq!(metric, "latency");
                assert_eq!(kind, "histogram");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_label_is_rejected() {
        let mut config = crd(vec![metric("conditions", "condition")]);
        config
            .common_labels
            .insert("type".to_string(), "spec.type".to_string());

        let err = build_descriptors(&config, "x").unwrap_err();
        assert!(matches!(err, ExporterError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_duplicate_metric_name_is_rejected() {
        let config = crd(vec![metric("gauge", "replicas"), metric("info", "replicas")]);
        match build_descriptors(&config, "x").unwrap_err() {
            ExporterError::InvalidCrd { crd, reason } => {
                assert_eq!(crd, "test-crd");
                assert!(reason.contains("x_test_crd_replicas"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Names that only differ before sanitizing also collide
        let config = crd(vec![metric("gauge", "ready-pods"), metric("gauge", "ready_pods")]);
        assert!(matches!(
            build_descriptors(&config, "x"),
            Err(ExporterError::InvalidCrd { .. })
        ));
    }

    #[test]
    fn test_empty_help_gets_fallback() {
        let mut gauge = metric("gauge", "replicas");
        gauge.help.clear();
        let descs = build_descriptors(&crd(vec![gauge]), "x").unwrap();
        assert!(!descs[0].help.is_empty());
    }

    #[test]
    fn test_descriptors_are_deterministic() {
        let config = crd(vec![metric("info", "info"), metric("conditions", "cond")]);
        let first = build_descriptors(&config, "p").unwrap();
        for _ in 0..10 {
            let again = build_descriptors(&config, "p").unwrap();
            for (a, b) in first.iter().zip(&again) {
                assert_eq!(a.name, b.name);
                assert_eq!(a.label_names, b.label_names);
            }
        }
    }
}
