//! Conversion of emitted samples into Prometheus metric families

use prometheus::core::Desc;
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use std::collections::HashMap;

/// One emitted series: label values plus the numeric value
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<String>,
    pub value: f64,
}

impl Sample {
    pub fn new(labels: Vec<String>, value: f64) -> Self {
        Self { labels, value }
    }
}

/// Build a gauge family. Label values pair positionally with `label_names`.
pub fn gauge_family(
    name: &str,
    help: &str,
    label_names: &[String],
    samples: &[Sample],
) -> MetricFamily {
    let mut family = MetricFamily::default();
    family.set_name(name.to_string());
    family.set_help(help.to_string());
    family.set_field_type(MetricType::GAUGE);

    for sample in samples {
        let mut metric = Metric::default();
        for (label, value) in label_names.iter().zip(&sample.labels) {
            let mut pair = LabelPair::default();
            pair.set_name(label.clone());
            pair.set_value(value.clone());
            metric.mut_label().push(pair);
        }

        let mut gauge = Gauge::default();
        gauge.set_value(sample.value);
        metric.set_gauge(gauge);
        family.mut_metric().push(metric);
    }

    family
}

/// A fixed gauge family: descriptor plus the fields needed to emit it
#[derive(Debug, Clone)]
pub struct GaugeDesc {
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
    desc: Desc,
}

impl GaugeDesc {
    pub fn new(name: String, help: &str, label_names: &[&str]) -> prometheus::Result<Self> {
        let label_names: Vec<String> = label_names.iter().map(|l| l.to_string()).collect();
        let desc = Desc::new(
            name.clone(),
            help.to_string(),
            label_names.clone(),
            HashMap::new(),
        )?;

        Ok(Self {
            name,
            help: help.to_string(),
            label_names,
            desc,
        })
    }

    pub fn desc(&self) -> &Desc {
        &self.desc
    }

    pub fn family(&self, samples: &[Sample]) -> MetricFamily {
        gauge_family(&self.name, &self.help, &self.label_names, samples)
    }
}
