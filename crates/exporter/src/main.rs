//! State metrics exporter
//!
//! Watches Kubernetes objects and serves their state as Prometheus
//! metrics, alongside windowed pod and event aggregates.

use anyhow::{Context, Result};
use clap::Parser;
use exporter_lib::registry::wait_for_sync;
use exporter_lib::{
    CollectorRegistry, FactoryContext, HealthRegistry, LifecycleGate, StructuredLogger,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use state_metrics::{api, kube_watch, Cli, ExporterConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Interval between cache sync checks during startup
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

async fn kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("invalid kubeconfig")?;
            Ok(Client::try_from(config)?)
        }
        None => Client::try_default()
            .await
            .context("failed to create Kubernetes client"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ExporterConfig::from_cli(&cli)?;

    // Initialize tracing with JSON output; RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(fmt::layer().json())
        .init();

    info!("Starting state-metrics");

    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "state-metrics".to_string());
    let logger = StructuredLogger::new(instance);

    // Single instance: the gate opens at start and closes on shutdown
    let gate = LifecycleGate::open();
    let registry = CollectorRegistry::with_builtin()?;
    let collectors = registry.build(
        &config.enabled_collectors,
        &FactoryContext {
            metrics_namespace: &config.metrics_namespace,
            collectors: &config.collectors,
            gate: &gate,
        },
    )?;
    let names: Vec<String> = collectors.iter().map(|c| c.name().to_string()).collect();

    let prom_registry = prometheus::default_registry().clone();
    for collector in &collectors {
        for metrics in collector.prometheus_collectors() {
            prom_registry
                .register(metrics)
                .with_context(|| format!("failed to register {} metrics", collector.name()))?;
        }
    }

    let health_registry = HealthRegistry::new();
    for name in &names {
        health_registry.register(name).await;
    }

    let client = kube_client(config.kubeconfig.as_deref()).await?;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    logger.log_startup(EXPORTER_VERSION, &names);
    for collector in &collectors {
        let targets = collector.watch_targets();
        logger.log_collector_started(collector.name(), targets.len());

        for target in targets {
            tasks.push(tokio::spawn(kube_watch::run_watch(
                client.clone(),
                target,
                health_registry.clone(),
                logger.clone(),
                shutdown_tx.subscribe(),
            )));
        }
        tasks.extend(collector.spawn_background(&shutdown_tx));
    }

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        prom_registry,
        gate.clone(),
    ));
    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(api::serve(config.server.port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    let timeout = Duration::from_secs(config.sync_timeout_secs);
    if let Err(e) = wait_for_sync(&collectors, timeout, SYNC_POLL_INTERVAL).await {
        error!(error = %e, "Initial cache sync failed");
        let _ = shutdown_tx.send(());
        return Err(e.into());
    }
    health_registry.set_ready(true).await;
    info!(collectors = ?names, "All collector caches synced");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    gate.set_may_run(false);
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    for task in tasks {
        let _ = task.await;
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
