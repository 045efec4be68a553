//! Exporter configuration
//!
//! Built-in defaults, then an optional YAML file, then `STATE_METRICS__*`
//! environment variables. Command-line flags are applied last.

use crate::cli::Cli;
use anyhow::{Context, Result};
use exporter_lib::CollectorsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "STATE_METRICS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub server: ServerConfig,

    /// Prefix of every exported metric name
    pub metrics_namespace: String,

    /// Collectors to build, in order
    pub enabled_collectors: Vec<String>,

    /// Bound on the initial cache sync before startup fails
    pub sync_timeout_secs: u64,

    pub log_level: String,

    /// Kubeconfig path; in-cluster or default discovery when unset
    pub kubeconfig: Option<PathBuf>,

    pub collectors: CollectorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            metrics_namespace: "state_metrics".to_string(),
            enabled_collectors: vec!["crd".to_string(), "pod".to_string(), "event".to_string()],
            sync_timeout_secs: 120,
            log_level: "info".to_string(),
            kubeconfig: None,
            collectors: CollectorsConfig::default(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("enabled_collectors"),
            )
            .build()
            .with_context(|| match path {
                Some(path) => format!("failed to read configuration from {}", path.display()),
                None => "failed to read configuration from environment".to_string(),
            })?;

        config
            .try_deserialize()
            .context("invalid exporter configuration")
    }

    /// Load, then apply command-line overrides
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = Self::load(cli.config.as_deref())?;
        config.apply_cli(cli);
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(kubeconfig) = &cli.kubeconfig {
            self.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(collectors) = &cli.collectors {
            self.enabled_collectors = collectors.clone();
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
        if let Some(namespace) = &cli.metrics_namespace {
            self.metrics_namespace = namespace.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ExporterConfig::default();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.metrics_namespace, "state_metrics");
        assert_eq!(config.enabled_collectors, vec!["crd", "pod", "event"]);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.collectors.event.max_events, 1000);
        assert_eq!(config.collectors.pod.aggregator.window_secs, 300);
        assert!(config.collectors.crd.crds.is_empty());
    }

    #[test]
    fn test_load_yaml_file() {
        let file = yaml_file(
            r#"
server:
  port: 9100
enabled_collectors: [crd]
collectors:
  event:
    max_events: 50
  crd:
    crds:
      - name: kubeblocks-cluster
        gvr:
          group: apps.kubeblocks.io
          version: v1alpha1
          resource: clusters
          kind: Cluster
        common_labels:
          name: metadata.name
          namespace: metadata.namespace
        metrics:
          - type: map_state
            name: component_status
            help: Component phase
            path: status.components
            value_path: phase
            key_label: component
          - type: count
            name: phase_count
            path: status.phase
            value_label: phase
"#,
        );

        let config = ExporterConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.enabled_collectors, vec!["crd"]);
        assert_eq!(config.collectors.event.max_events, 50);
        assert_eq!(config.collectors.event.window_secs, 300);

        let crd = &config.collectors.crd.crds[0];
        assert_eq!(crd.name, "kubeblocks-cluster");
        assert_eq!(crd.gvr.resource, "clusters");
        assert_eq!(crd.common_labels["namespace"], "metadata.namespace");
        assert_eq!(crd.metrics[0].kind, "map_state");
        assert_eq!(crd.metrics[0].key_label, "component");
        assert_eq!(crd.metrics[1].value_label, "phase");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ExporterConfig::load(Some(Path::new("/nonexistent/state-metrics.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("STATE_METRICS__SYNC_TIMEOUT_SECS", "45");
        let config = ExporterConfig::load(None);
        std::env::remove_var("STATE_METRICS__SYNC_TIMEOUT_SECS");

        assert_eq!(config.unwrap().sync_timeout_secs, 45);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = yaml_file("server:\n  port: 9100\nlog_level: warn\n");
        let cli = Cli::parse_from([
            "state-metrics",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "9200",
            "--collectors",
            "pod,event",
            "--metrics-namespace",
            "kube",
        ]);

        let config = ExporterConfig::from_cli(&cli).unwrap();
        assert_eq!(config.server.port, 9200);
        assert_eq!(config.enabled_collectors, vec!["pod", "event"]);
        assert_eq!(config.metrics_namespace, "kube");
        assert_eq!(config.log_level, "warn");
    }
}
