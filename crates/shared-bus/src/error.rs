//! # Error Types
//!
//! | Error | Raised by | Reaches the caller |
//! |-------|-----------|--------------------|
//! | `BusError` | coordinator, publisher | yes |
//! | `BrokerError` | broker port | wrapped in `BusError` |
//! | `FetchError` | pull subscription | no, poller only |
//! | `DispatchError` | handler dispatch | no, converted to nak |
//! | `SettleError` | ack/nak | no, logged |
//! | `PublishError` | publisher | wrapped in `BusError::PublishFailure` |

use std::time::Duration;

use shared_types::{CodecError, Topic};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the event-bus client.
#[derive(Debug, Error)]
pub enum BusError {
    /// Broker connection could not be established or provisioned.
    #[error("Failed to connect to {url}: {source}")]
    ConnectFailure {
        url: String,
        #[source]
        source: BrokerError,
    },

    /// Operation attempted on a closing or closed client.
    #[error("Event bus client is closed")]
    ClientClosed,

    /// Durable consumer could not be created or bound.
    #[error("Failed to set up consumer {consumer} on {topic}: {source}")]
    ConsumerSetupFailure {
        topic: Topic,
        consumer: String,
        #[source]
        source: BrokerError,
    },

    /// Broker rejected or did not confirm a publish.
    #[error("Failed to publish on {topic}: {source}")]
    PublishFailure {
        topic: Topic,
        #[source]
        source: PublishError,
    },

    /// Last error seen while cancelling subscriptions.
    #[error("Failed to unsubscribe {topic}: {source}")]
    UnsubscribeFailure {
        topic: Topic,
        #[source]
        source: BrokerError,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors reported by a broker adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not connected")]
    Disconnected,

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("No stream accepts subject {0}")]
    NoStreamForSubject(String),

    #[error("Consumer already exists: {0}")]
    ConsumerAlreadyExists(String),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    #[error("Message already settled")]
    AlreadySettled,

    #[error("Broker request failed: {0}")]
    Request(String),
}

/// Outcome of a pull fetch that returned no messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Max wait elapsed with nothing to deliver.
    #[error("Fetch timed out")]
    Timeout,

    #[error("No messages available")]
    NoMessages,

    /// The subscription was cancelled; the poller must exit.
    #[error("Subscription closed")]
    Closed,

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Per-message handling failure. Never escapes a poller.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to decode message: {0}")]
    Decode(#[from] CodecError),

    #[error("Handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Label used for the nak reason metric.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Handler(_) => "handler",
            Self::Panicked(_) => "panic",
        }
    }
}

/// Acknowledgement round trip failures. Logged, never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettleError {
    #[error("Ack failed for sequence {sequence}: {source}")]
    AckFailure {
        sequence: u64,
        #[source]
        source: BrokerError,
    },

    #[error("Nak failed for sequence {sequence}: {source}")]
    NakFailure {
        sequence: u64,
        #[source]
        source: BrokerError,
    },
}

impl SettleError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AckFailure { .. } => "ack",
            Self::NakFailure { .. } => "nak",
        }
    }
}

/// Cause of a failed publish.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
