//! # Ports
//!
//! - **Inbound** (`inbound`): what callers of the bus implement or use:
//!   event handlers and the publisher/consumer views of a client.
//! - **Outbound** (`outbound`): what the bus needs from a message broker.

pub mod inbound;
pub mod outbound;

pub use inbound::{handler_fn, EventConsumer, EventHandler, EventPublisher, FnHandler, PipelineHandler};
pub use outbound::{
    Broker, ConnectOptions, Connector, ConsumerSpec, Delivery, PublishAck, PullSubscription,
    StreamSpec, StreamStats,
};
