//! # Bus Runtime
//!
//! Wires configuration, telemetry and an `EventBusClient` into a process
//! that observes every pipeline topic.
//!
//! ## Startup Sequence
//!
//! 1. Load `TelemetryConfig` and `BusConfig` from the environment
//! 2. Initialize logging and register metrics
//! 3. Connect and provision the stream
//! 4. Subscribe the logging handler on all three topics
//! 5. Wait for Ctrl+C or SIGTERM, then close the client

pub mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use shared_bus::{BusConfig, BusDiagnostics, Connector, EventBusClient};
use tracing::info;

pub use handlers::{EventCounts, LoggingHandler};

/// A connected client with the logging handler subscribed.
pub struct BusRuntime {
    client: EventBusClient,
    handler: Arc<LoggingHandler>,
}

impl BusRuntime {
    /// Connect and subscribe the logging handler on every topic.
    pub async fn start(config: BusConfig, connector: &dyn Connector) -> Result<Self> {
        info!("===========================================");
        info!("  Odds Event Bus Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let url = config.url.clone();
        let client = EventBusClient::connect(config, connector)
            .await
            .with_context(|| format!("Failed to connect to event bus at {url}"))?;

        let handler = Arc::new(LoggingHandler::new());
        client
            .subscribe_pipeline(handler.clone())
            .await
            .context("Failed to subscribe pipeline handlers")?;

        info!(
            stream = %client.config().stream_name,
            consumer = %client.config().consumer_name,
            "Runtime started"
        );
        Ok(Self { client, handler })
    }

    #[must_use]
    pub fn client(&self) -> &EventBusClient {
        &self.client
    }

    #[must_use]
    pub fn counts(&self) -> EventCounts {
        self.handler.counts()
    }

    /// Close the client and return the final diagnostics.
    pub async fn shutdown(self) -> Result<BusDiagnostics> {
        info!("Initiating graceful shutdown...");
        self.client
            .close()
            .await
            .context("Failed to close event bus client")?;
        let report = self.client.diagnostics().await;
        info!(counts = ?self.handler.counts(), "Shutdown complete");
        Ok(report)
    }
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
            _ = terminate.recv() => info!("SIGTERM received"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")
    }
}
