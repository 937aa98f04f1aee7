//! # Odds Event Bus Runtime
//!
//! Connects to the event bus and logs every matched bundle, monitoring
//! snapshot and fork published by the pipeline.
//!
//! Runs against NATS JetStream when built with `--features nats`, otherwise
//! against an in-process broker.

use anyhow::{Context, Result};
use bus_runtime::{shutdown_signal, BusRuntime};
use bus_telemetry::{init_telemetry, TelemetryConfig};
use shared_bus::{BusConfig, Connector};
use tracing::info;

#[cfg(feature = "nats")]
fn connector() -> impl Connector {
    shared_bus::NatsConnector::new()
}

#[cfg(not(feature = "nats"))]
fn connector() -> impl Connector {
    info!("Built without the nats feature, using the in-memory broker");
    shared_bus::InMemoryBroker::new()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging before anything else logs
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry).context("Failed to initialize telemetry")?;

    let config = BusConfig::from_env();
    let connector = connector();

    let runtime = BusRuntime::start(config, &connector).await?;

    info!("Bus runtime is running. Press Ctrl+C to stop.");
    shutdown_signal().await?;

    let report = runtime.shutdown().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to encode diagnostics")?
    );

    Ok(())
}
