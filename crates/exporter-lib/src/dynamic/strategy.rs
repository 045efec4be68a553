//! Metric type strategies
//!
//! Each strategy turns one cached object (or, for `count`, the whole cache)
//! into label/value samples. Label values are produced in exactly the order
//! fixed by the descriptor builder.

use super::config::MetricKind;
use super::descriptor::MetricDescriptor;
use super::extract::{extract_float, extract_map, extract_slice, extract_string};
use crate::exposition::Sample;
use serde_json::Value;
use std::collections::BTreeMap;

/// Extract common label values in sorted label-name order.
pub fn common_label_values(common_paths: &[String], obj: &Value) -> Vec<String> {
    common_paths
        .iter()
        .map(|path| extract_string(obj, path).to_string())
        .collect()
}

/// Emit the samples of a per-resource metric for one object.
///
/// Aggregate kinds emit nothing here; see [`count_samples`].
pub fn resource_samples(
    descriptor: &MetricDescriptor,
    obj: &Value,
    common: &[String],
    out: &mut Vec<Sample>,
) {
    match descriptor.kind {
        MetricKind::Info => info(descriptor, obj, common, out),
        MetricKind::Gauge => gauge(descriptor, obj, common, out),
        MetricKind::MapState => map_state(descriptor, obj, common, out),
        MetricKind::MapGauge => map_gauge(descriptor, obj, common, out),
        MetricKind::Conditions => conditions(descriptor, obj, common, out),
        MetricKind::Count => {}
    }
}

fn with_common(common: &[String], extra: usize) -> Vec<String> {
    let mut labels = Vec::with_capacity(common.len() + extra);
    labels.extend_from_slice(common);
    labels
}

fn info(descriptor: &MetricDescriptor, obj: &Value, common: &[String], out: &mut Vec<Sample>) {
    let extra = &descriptor.config.labels;
    let mut labels = with_common(common, extra.len());
    labels.extend(extra.values().map(|path| extract_string(obj, path).to_string()));
    out.push(Sample::new(labels, 1.0));
}

fn gauge(descriptor: &MetricDescriptor, obj: &Value, common: &[String], out: &mut Vec<Sample>) {
    let value = extract_float(obj, &descriptor.config.path);
    out.push(Sample::new(common.to_vec(), value));
}

/// Only entries with a non-empty current state are emitted, at value 1.
fn map_state(descriptor: &MetricDescriptor, obj: &Value, common: &[String], out: &mut Vec<Sample>) {
    let Some(entries) = extract_map(obj, &descriptor.config.path) else {
        return;
    };

    for (key, entry) in entries {
        if !entry.is_object() {
            continue;
        }

        let state = extract_string(entry, &descriptor.config.value_path);
        if state.is_empty() {
            continue;
        }

        let mut labels = with_common(common, 2);
        labels.push(key.clone());
        labels.push(state.to_string());
        out.push(Sample::new(labels, 1.0));
    }
}

fn map_gauge(descriptor: &MetricDescriptor, obj: &Value, common: &[String], out: &mut Vec<Sample>) {
    let Some(entries) = extract_map(obj, &descriptor.config.path) else {
        return;
    };

    for (key, entry) in entries {
        if !entry.is_object() {
            continue;
        }

        let value = extract_float(entry, &descriptor.config.value_path);
        let mut labels = with_common(common, 1);
        labels.push(key.clone());
        out.push(Sample::new(labels, value));
    }
}

fn conditions(
    descriptor: &MetricDescriptor,
    obj: &Value,
    common: &[String],
    out: &mut Vec<Sample>,
) {
    let fields = descriptor.config.condition_fields();
    let field = |entry: &Value, name: &str| -> String {
        entry
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    for entry in extract_slice(obj, &descriptor.config.path) {
        if !entry.is_object() {
            continue;
        }

        let cond_type = field(entry, fields.type_field);
        if cond_type.is_empty() {
            continue;
        }
        let status = field(entry, fields.status_field);
        let reason = field(entry, fields.reason_field);

        let value = if status.eq_ignore_ascii_case("true") { 1.0 } else { 0.0 };

        let mut labels = with_common(common, 3);
        labels.extend([cond_type, status, reason]);
        out.push(Sample::new(labels, value));
    }
}

/// Count objects by the string value at the metric's path.
///
/// Objects with an empty value contribute to no bucket. Output is ordered
/// by discovered value.
pub fn count_samples<'a>(
    descriptor: &MetricDescriptor,
    objects: impl IntoIterator<Item = &'a Value>,
) -> Vec<Sample> {
    let mut counts: BTreeMap<&str, f64> = BTreeMap::new();

    for obj in objects {
        let value = extract_string(obj, &descriptor.config.path);
        if !value.is_empty() {
            *counts.entry(value).or_default() += 1.0;
        }
    }

    counts
        .into_iter()
        .map(|(value, count)| Sample::new(vec![value.to_string()], count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::config::{ConditionConfig, CrdConfig, GvrConfig, MetricConfig};
    use crate::dynamic::descriptor::build_descriptors;
    use serde_json::json;

    fn descriptor(metric: MetricConfig) -> MetricDescriptor {
        let crd = CrdConfig {
            name: "test".to_string(),
            gvr: GvrConfig::new("", "v1", "things", "Thing"),
            metrics: vec![metric],
            ..Default::default()
        };
        build_descriptors(&crd, "").unwrap().remove(0)
    }

    fn run(descriptor: &MetricDescriptor, obj: &Value) -> Vec<Sample> {
        let mut out = Vec::new();
        resource_samples(descriptor, obj, &["c".to_string()], &mut out);
        out
    }

    #[test]
    fn test_info_emits_once_with_extra_labels() {
        let desc = descriptor(MetricConfig {
            kind: "info".to_string(),
            name: "info".to_string(),
            labels: [("version".to_string(), "spec.version".to_string())].into(),
            ..Default::default()
        });

        let samples = run(&desc, &json!({"spec": {"version": "v1.0.0"}}));
        assert_eq!(samples, vec![Sample::new(vec!["c".into(), "v1.0.0".into()], 1.0)]);

        let samples = run(&desc, &json!({}));
        assert_eq!(samples, vec![Sample::new(vec!["c".into(), "".into()], 1.0)]);
    }

    #[test]
    fn test_gauge_defaults_to_zero() {
        let desc = descriptor(MetricConfig {
            kind: "gauge".to_string(),
            name: "replicas".to_string(),
            path: "spec.replicas".to_string(),
            ..Default::default()
        });

        assert_eq!(run(&desc, &json!({"spec": {"replicas": 5}}))[0].value, 5.0);
        assert_eq!(run(&desc, &json!({"spec": {"replicas": "lots"}}))[0].value, 0.0);
        assert_eq!(run(&desc, &json!({}))[0].value, 0.0);
    }

    #[test]
    fn test_map_state_skips_entries_without_state() {
        let desc = descriptor(MetricConfig {
            kind: "map_state".to_string(),
            name: "component_status".to_string(),
            path: "status.components".to_string(),
            value_path: "phase".to_string(),
            key_label: "component".to_string(),
            ..Default::default()
        });

        let obj = json!({"status": {"components": {
            "web": {"phase": "Running"},
            "db": {"phase": "Ready"},
            "cache": {"phase": ""},
            "queue": {},
            "broken": "not-a-map"
        }}});

        let samples = run(&desc, &obj);
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.value == 1.0));
        assert!(samples.contains(&Sample::new(
            vec!["c".into(), "web".into(), "Running".into()],
            1.0
        )));
        assert!(samples.contains(&Sample::new(vec!["c".into(), "db".into(), "Ready".into()], 1.0)));
    }

    #[test]
    fn test_map_gauge_defaults_missing_values() {
        let desc = descriptor(MetricConfig {
            kind: "map_gauge".to_string(),
            name: "component_replicas".to_string(),
            path: "status.components".to_string(),
            value_path: "replicas".to_string(),
            ..Default::default()
        });

        let obj = json!({"status": {"components": {
            "web": {"replicas": 3},
            "db": {}
        }}});

        let mut samples = run(&desc, &obj);
        samples.sort_by(|a, b| a.labels.cmp(&b.labels));
        assert_eq!(samples[0], Sample::new(vec!["c".into(), "db".into()], 0.0));
        assert_eq!(samples[1], Sample::new(vec!["c".into(), "web".into()], 3.0));
    }

    #[test]
    fn test_conditions_polarity() {
        let desc = descriptor(MetricConfig {
            kind: "conditions".to_string(),
            name: "condition".to_string(),
            path: "status.conditions".to_string(),
            ..Default::default()
        });

        let obj = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True", "reason": "AllGood"},
            {"type": "Synced", "status": "TRUE"},
            {"type": "Progressing", "status": "False", "reason": "Stalled"},
            {"type": "Degraded", "status": "Unknown"},
            {"type": "Empty"},
            {"status": "True"},
            "garbage"
        ]}});

        let samples = run(&desc, &obj);
        let values: Vec<(&str, f64)> = samples
            .iter()
            .map(|s| (s.labels[1].as_str(), s.value))
            .collect();

        assert_eq!(
            values,
            vec![
                ("Ready", 1.0),
                ("Synced", 1.0),
                ("Progressing", 0.0),
                ("Degraded", 0.0),
                ("Empty", 0.0),
            ]
        );
        assert_eq!(samples[0].labels, vec!["c", "Ready", "True", "AllGood"]);
        assert_eq!(samples[4].labels, vec!["c", "Empty", "", ""]);
    }

    #[test]
    fn test_conditions_custom_fields() {
        let desc = descriptor(MetricConfig {
            kind: "conditions".to_string(),
            name: "condition".to_string(),
            path: "status.checks".to_string(),
            condition: Some(ConditionConfig {
                type_field: "name".to_string(),
                status_field: "ok".to_string(),
                reason_field: "why".to_string(),
            }),
            ..Default::default()
        });

        let obj = json!({"status": {"checks": [{"name": "dns", "ok": "true", "why": "resolved"}]}});
        let samples = run(&desc, &obj);
        let labels = vec!["c".into(), "dns".into(), "true".into(), "resolved".into()];
        assert_eq!(samples, vec![Sample::new(labels, 1.0)]);
    }

    #[test]
    fn test_count_buckets_and_excludes_empty() {
        let desc = descriptor(MetricConfig {
            kind: "count".to_string(),
            name: "phase_count".to_string(),
            path: "status.phase".to_string(),
            value_label: "phase".to_string(),
            ..Default::default()
        });

        let phases = ["A", "A", "A", "B", "B", "C", ""];
        let mut objects: Vec<Value> = phases
            .iter()
            .map(|p| json!({"status": {"phase": p}}))
            .collect();
        objects.push(json!({"status": {}}));

        let samples = count_samples(&desc, &objects);
        assert_eq!(
            samples,
            vec![
                Sample::new(vec!["A".into()], 3.0),
                Sample::new(vec!["B".into()], 2.0),
                Sample::new(vec!["C".into()], 1.0),
            ]
        );
    }

    #[test]
    fn test_count_is_skipped_per_resource() {
        let desc = descriptor(MetricConfig {
            kind: "count".to_string(),
            name: "phase_count".to_string(),
            path: "status.phase".to_string(),
            ..Default::default()
        });
        assert!(run(&desc, &json!({"status": {"phase": "A"}})).is_empty());
    }
}
