//! # Broker Port
//!
//! The collaborator the bus is built on: a JetStream-style broker offering
//! durable consumers, batched pull fetch with a wait bound, per-message
//! ack/nak and publish-with-ack.
//!
//! ```text
//! Connector ──connect──► Broker ──bind_pull──► PullSubscription ──fetch──► [Delivery]
//!                          │                                                  │
//!                          ├── ensure_stream / ensure_consumer                ├── ack
//!                          ├── publish ──► PublishAck                         └── nak
//!                          └── stream_info ──► StreamStats
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BusConfig;
use crate::error::{BrokerError, FetchError};

/// Connection parameters handed to a `Connector`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub url: String,
    /// Client name reported to the broker.
    pub name: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub reconnect_wait: Duration,
    /// `None` reconnects forever.
    pub max_reconnects: Option<usize>,
}

impl From<&BusConfig> for ConnectOptions {
    fn from(config: &BusConfig) -> Self {
        Self {
            url: config.url.clone(),
            name: config.service_name.clone(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            reconnect_wait: config.reconnect_wait,
            max_reconnects: config.max_reconnects,
        }
    }
}

/// Stream to create if missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub max_age: Duration,
    pub replicas: usize,
}

impl From<&BusConfig> for StreamSpec {
    fn from(config: &BusConfig) -> Self {
        Self {
            name: config.stream_name.clone(),
            subjects: config.stream_subjects(),
            max_age: config.max_message_age,
            replicas: config.replicas,
        }
    }
}

/// Durable pull consumer definition.
///
/// Always explicit-ack, deliver-new, instant replay. Clients binding the
/// same durable share its messages, so there is no deliver group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub stream: String,
    pub durable: String,
    pub filter_subject: String,
    pub ack_wait: Duration,
    pub max_deliver: i64,
    pub max_ack_pending: i64,
}

/// Broker confirmation of a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
}

/// Stream totals for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub messages: u64,
    pub bytes: u64,
}

/// Opens broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn Broker>, BrokerError>;
}

/// An open broker connection.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the stream unless it already exists.
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BrokerError>;

    /// Create a durable consumer.
    ///
    /// Returns `BrokerError::ConsumerAlreadyExists` when the durable is
    /// already defined.
    async fn ensure_consumer(&self, spec: &ConsumerSpec) -> Result<(), BrokerError>;

    /// Bind a pull subscription to an existing durable consumer.
    async fn bind_pull(
        &self,
        stream: &str,
        durable: &str,
        subject: &str,
    ) -> Result<Arc<dyn PullSubscription>, BrokerError>;

    /// Publish and wait for the stream acknowledgement.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, BrokerError>;

    async fn stream_info(&self, stream: &str) -> Result<StreamStats, BrokerError>;

    fn is_connected(&self) -> bool;

    fn connected_url(&self) -> String;

    /// Flush and close. Further calls fail with `Disconnected`.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// A pull subscription bound to one durable consumer.
#[async_trait]
pub trait PullSubscription: Send + Sync {
    fn subject(&self) -> &str;

    /// Fetch up to `batch` messages, waiting at most `max_wait`.
    ///
    /// Messages come back in stream order. Must be cancel safe: dropping the
    /// future loses no messages.
    async fn fetch(
        &self,
        batch: usize,
        max_wait: Duration,
    ) -> Result<Vec<Box<dyn Delivery>>, FetchError>;

    /// Cancel the subscription. The durable consumer is kept.
    async fn unsubscribe(&self) -> Result<(), BrokerError>;
}

/// One delivered message awaiting settlement.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// Delivery attempt, starting at 1.
    fn delivered(&self) -> u64;

    fn stream_sequence(&self) -> u64;

    async fn ack(&self) -> Result<(), BrokerError>;

    /// Request immediate redelivery.
    async fn nak(&self) -> Result<(), BrokerError>;
}
