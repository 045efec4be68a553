//! Error types for the exporter library

use thiserror::Error;

/// Errors raised while building or starting collectors.
///
/// Malformed object data never surfaces here; field extraction is fail-soft.
#[derive(Error, Debug)]
pub enum ExporterError {
    /// A CRD definition is missing required identity fields
    #[error("invalid CRD definition {crd:?}: {reason}")]
    InvalidCrd { crd: String, reason: String },

    /// A metric definition names a type outside the supported vocabulary
    #[error("CRD {crd:?}: metric {metric:?} has unknown type {kind:?}")]
    UnknownMetricType {
        crd: String,
        metric: String,
        kind: String,
    },

    /// The metric name or label set was rejected by the metrics library
    #[error("CRD {crd:?}: metric {metric:?} has an invalid descriptor: {source}")]
    InvalidDescriptor {
        crd: String,
        metric: String,
        #[source]
        source: prometheus::Error,
    },

    #[error("collector {0:?} is already registered")]
    DuplicateCollector(String),

    #[error("collector {0:?} is not registered")]
    UnknownCollector(String),

    /// Carries the reason, e.g. `pod aggregator disabled`
    #[error("collector disabled by configuration: {0}")]
    CollectorDisabled(String),

    /// The initial object list never converged
    #[error("caches for {collectors:?} did not sync within {timeout_secs}s")]
    CacheSyncTimeout {
        collectors: Vec<String>,
        timeout_secs: u64,
    },

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, ExporterError>;
