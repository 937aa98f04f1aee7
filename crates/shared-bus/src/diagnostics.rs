//! Point-in-time report of a client's state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;
use crate::ports::outbound::StreamStats;

/// Client lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// Diagnostics returned by `EventBusClient::diagnostics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusDiagnostics {
    pub state: Lifecycle,
    pub is_connected: bool,
    pub url: String,
    pub stream: String,
    pub subscriptions: usize,
    pub handlers: usize,
    /// Subjects with a live subscription.
    pub topics: Vec<String>,
    /// `None` when stream info could not be fetched.
    pub stream_stats: Option<StreamStats>,
    pub metrics: MetricsSnapshot,
}
