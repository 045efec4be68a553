//! Declarative CRD metric configuration
//!
//! A `CrdConfig` names one resource kind to watch and the metrics to derive
//! from it. Configurations are immutable once a collector has been built.

use crate::error::{ExporterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Configuration section for the CRD collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrdCollectorConfig {
    pub crds: Vec<CrdConfig>,
}

/// Group/version/resource identity of a watched kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct GvrConfig {
    /// API group, empty for the core group
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `clusters`
    pub resource: String,
    /// Kind name; only used for type metadata on watched objects
    pub kind: String,
}

impl GvrConfig {
    pub fn new(group: &str, version: &str, resource: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            kind: kind.to_string(),
        }
    }

    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GvrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// One monitored resource kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrdConfig {
    pub name: String,
    pub gvr: GvrConfig,
    /// Namespaces to watch; empty means all namespaces
    pub namespaces: Vec<String>,
    /// Label name -> field path, attached to every per-resource metric
    pub common_labels: BTreeMap<String, String>,
    pub metrics: Vec<MetricConfig>,
}

impl CrdConfig {
    /// Reject definitions that cannot identify what to watch.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ExporterError::InvalidCrd {
                crd: self.gvr.to_string(),
                reason: "name must not be empty".to_string(),
            });
        }

        if self.gvr.resource.is_empty() {
            return Err(ExporterError::InvalidCrd {
                crd: self.name.clone(),
                reason: "gvr.resource must not be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn watches_all_namespaces(&self) -> bool {
        self.namespaces.is_empty()
    }
}

/// One declarative metric definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// One of `info`, `count`, `gauge`, `map_state`, `map_gauge`, `conditions`
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub help: String,
    pub path: String,
    /// Path inside each map entry (map metrics)
    pub value_path: String,
    /// Label carrying the map key (map metrics)
    pub key_label: String,
    /// Label carrying the discovered value (count)
    pub value_label: String,
    /// Extra label name -> field path (info)
    pub labels: BTreeMap<String, String>,
    pub condition: Option<ConditionConfig>,
}

/// Field names inside condition entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    pub type_field: String,
    pub status_field: String,
    pub reason_field: String,
}

/// Resolved condition field names with defaults applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionFields<'a> {
    pub type_field: &'a str,
    pub status_field: &'a str,
    pub reason_field: &'a str,
}

impl MetricConfig {
    pub fn condition_fields(&self) -> ConditionFields<'_> {
        fn or_default<'a>(value: Option<&'a String>, default: &'a str) -> &'a str {
            value.filter(|v| !v.is_empty()).map_or(default, String::as_str)
        }

        let cond = self.condition.as_ref();
        ConditionFields {
            type_field: or_default(cond.map(|c| &c.type_field), "type"),
            status_field: or_default(cond.map(|c| &c.status_field), "status"),
            reason_field: or_default(cond.map(|c| &c.reason_field), "reason"),
        }
    }
}

/// The supported metric vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Info,
    Count,
    Gauge,
    MapState,
    MapGauge,
    Conditions,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Info,
        MetricKind::Count,
        MetricKind::Gauge,
        MetricKind::MapState,
        MetricKind::MapGauge,
        MetricKind::Conditions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Info => "info",
            MetricKind::Count => "count",
            MetricKind::Gauge => "gauge",
            MetricKind::MapState => "map_state",
            MetricKind::MapGauge => "map_gauge",
            MetricKind::Conditions => "conditions",
        }
    }

    /// Aggregate kinds scan the whole cache instead of one object
    pub fn is_aggregate(&self) -> bool {
        matches!(self, MetricKind::Count)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}
