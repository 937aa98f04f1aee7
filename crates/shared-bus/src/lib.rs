//! # Shared Bus - Durable Event Bus Client
//!
//! Typed publishing and durable pull subscriptions for the odds monitoring
//! pipeline, on top of a JetStream-style broker.
//!
//! ## Delivery Flow
//!
//! ```text
//! ┌──────────────┐  publish_*()   ┌──────────────────┐
//! │   Producer   │ ─────────────► │  Stream "EVENTS" │
//! └──────────────┘  (await ack)   └────────┬─────────┘
//!                                          │ durable pull consumer
//!                                          ▼     (one per topic)
//!                                 ┌──────────────────┐
//!                                 │      Poller      │ fetch(batch, max_wait)
//!                                 └────────┬─────────┘
//!                                          │ decode + dispatch
//!                                          ▼
//!                                 ┌──────────────────┐
//!                                 │ HandlerRegistry  │── Ok ──► ack
//!                                 └──────────────────┘── Err ─► nak (redeliver)
//! ```
//!
//! ## Guarantees
//!
//! - **At-least-once:** a message is acked only after its handler succeeds;
//!   failures are naked and redelivered up to `max_deliver` times.
//! - **No handler, no redelivery:** a message on a topic without a handler is
//!   acked and logged.
//! - **Bounded shutdown:** `close` stops every poller and waits at most
//!   `shutdown_timeout` before closing the connection.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod ports;
pub mod publisher;
pub mod registry;

mod poller;

pub use adapters::InMemoryBroker;
#[cfg(feature = "nats")]
pub use adapters::NatsConnector;
pub use client::{factory, EventBusClient};
pub use config::{BusConfig, ConfigError};
pub use diagnostics::{BusDiagnostics, Lifecycle};
pub use error::{BrokerError, BusError, DispatchError, FetchError, PublishError, SettleError};
pub use handler::{MessageHandler, PipelineAdapter, TypedHandler};
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use ports::{
    handler_fn, Broker, ConnectOptions, Connector, ConsumerSpec, Delivery, EventConsumer,
    EventHandler, EventPublisher, PipelineHandler, PublishAck, PullSubscription, StreamSpec,
    StreamStats,
};
pub use publisher::Publisher;
pub use registry::HandlerRegistry;
