//! Command-line flags. Every flag overrides the matching config key.

use clap::Parser;
use std::path::PathBuf;

/// Kubernetes state metrics exporter
#[derive(Debug, Parser)]
#[command(name = "state-metrics")]
#[command(
    author,
    version,
    about = "Export Kubernetes object state as Prometheus metrics",
    long_about = None
)]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, env = "STATE_METRICS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port for /metrics, /healthz and /readyz
    #[arg(long)]
    pub port: Option<u16>,

    /// Path to kubeconfig file (uses in-cluster or default config if not specified)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Comma-separated collectors to enable, e.g. `crd,pod`
    #[arg(long, value_delimiter = ',')]
    pub collectors: Option<Vec<String>>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,

    /// Prefix for every exported metric name
    #[arg(long)]
    pub metrics_namespace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_optional() {
        let cli = Cli::parse_from(["state-metrics"]);
        assert!(cli.port.is_none());
        assert!(cli.collectors.is_none());
    }

    #[test]
    fn test_collectors_split_on_comma() {
        let cli = Cli::parse_from(["state-metrics", "--collectors", "crd,event"]);
        assert_eq!(cli.collectors, Some(vec!["crd".to_string(), "event".to_string()]));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
