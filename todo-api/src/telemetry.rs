//! Logging and metrics setup.

use crate::config::{LogFormat, TelemetryConfig};
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,todo_api=debug,todo_events_core=debug,rdkafka=warn,sqlx=warn";

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .context("Failed to install tracing subscriber")
}

/// Install the Prometheus recorder and its scrape endpoint, if configured.
///
/// Must run inside a tokio runtime: the exporter serves from a spawned task.
///
/// # Errors
///
/// Fails if a recorder is already installed or the port cannot be bound.
pub fn init_metrics(config: &TelemetryConfig) -> anyhow::Result<()> {
    let Some(port) = config.metrics_port else {
        tracing::debug!("Metrics exporter disabled");
        return Ok(());
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    tracing::info!(addr = %addr, "Metrics available at http://{addr}/metrics");
    Ok(())
}
