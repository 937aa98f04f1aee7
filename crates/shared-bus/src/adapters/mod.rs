//! # Broker Adapters
//!
//! Implementations of the outbound broker port.
//!
//! - `in_memory`: single-process broker with JetStream semantics
//! - `nats`: NATS JetStream over `async-nats` (feature `nats`)

pub mod in_memory;
#[cfg(feature = "nats")]
pub mod nats;

pub use in_memory::InMemoryBroker;
#[cfg(feature = "nats")]
pub use nats::NatsConnector;
