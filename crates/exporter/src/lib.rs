//! State metrics exporter process
//!
//! Configuration loading, the Kubernetes watch adapter and the HTTP
//! surface around the `exporter_lib` engine.

pub mod api;
pub mod cli;
pub mod config;
pub mod kube_watch;

pub use cli::Cli;
pub use config::ExporterConfig;
