//! State metrics engine
//!
//! This crate provides the core functionality for:
//! - Configuration-driven metrics over arbitrary resource kinds
//! - Windowed, capacity-bounded aggregation of high-churn objects
//! - Lifecycle gating and cache-sync tracking
//! - An explicit collector registry
//! - Health checks and observability

pub mod aggregate;
pub mod dynamic;
pub mod error;
pub mod exposition;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod watch;

pub use error::{ExporterError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{LifecycleGate, SyncHandle, SyncTracker};
pub use observability::{ExporterMetrics, StructuredLogger};
pub use registry::{CollectorRegistry, CollectorsConfig, FactoryContext, StateCollector};
pub use watch::{EventHandlerFuncs, ResourceEvent, WatchTarget};
