//! # Logging Handlers
//!
//! Pipeline handler that logs every event it receives and keeps per-kind
//! counts. Used by the runtime to observe traffic on all three topics.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use shared_bus::PipelineHandler;
use shared_types::{ForkFoundEvent, MatchBundleEvent, MatchMonitoringEvent};
use tracing::info;

/// Counts of events seen per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub match_bundles: u64,
    pub monitoring: u64,
    pub forks: u64,
}

/// Logs each event at info level.
#[derive(Debug, Default)]
pub struct LoggingHandler {
    match_bundles: AtomicU64,
    monitoring: AtomicU64,
    forks: AtomicU64,
}

impl LoggingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counts(&self) -> EventCounts {
        EventCounts {
            match_bundles: self.match_bundles.load(Ordering::Relaxed),
            monitoring: self.monitoring.load(Ordering::Relaxed),
            forks: self.forks.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl PipelineHandler for LoggingHandler {
    async fn handle_match_bundle_found(&self, event: MatchBundleEvent) -> anyhow::Result<()> {
        self.match_bundles.fetch_add(1, Ordering::Relaxed);
        info!(
            event_id = %event.event_id(),
            correlation_id = event.correlation_id(),
            source = %event.event_header.source,
            teams = ?event.payload.team_names,
            bookmakers = event.payload.bookmaker_bundle.len(),
            "Match bundle found"
        );
        Ok(())
    }

    async fn handle_match_monitoring(&self, event: MatchMonitoringEvent) -> anyhow::Result<()> {
        self.monitoring.fetch_add(1, Ordering::Relaxed);
        info!(
            event_id = %event.event_id(),
            correlation_id = event.correlation_id(),
            sport = ?event.payload.sport_type,
            teams = ?event.payload.team_names,
            bets = event.payload.bets.len(),
            "Match monitoring snapshot"
        );
        Ok(())
    }

    async fn handle_fork_found(&self, event: ForkFoundEvent) -> anyhow::Result<()> {
        self.forks.fetch_add(1, Ordering::Relaxed);
        info!(
            event_id = %event.event_id(),
            correlation_id = event.correlation_id(),
            teams = ?event.payload.team_names,
            detected_at = %event.payload.timestamp,
            "Fork found"
        );
        Ok(())
    }
}
