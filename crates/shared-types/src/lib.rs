//! # Shared Types Crate
//!
//! Domain values of the odds monitoring pipeline and the versioned
//! `Envelope<P>` that wraps them on the bus.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Payload shapes shared by every publisher and
//!   subscriber are defined here.
//! - **Static Topic Binding**: Each payload type is bound to exactly one topic
//!   through `TopicPayload`, so a payload cannot be published on the wrong
//!   stream.
//! - **Immutable Headers**: An `EventHeader` is built once by the
//!   `EnvelopeBuilder` and never modified.

pub mod builder;
pub mod entities;
pub mod envelope;
pub mod errors;
pub mod topics;

pub use builder::EnvelopeBuilder;
pub use entities::*;
pub use envelope::{
    decode, decode_any, encode, AnyEnvelope, Envelope, EventHeader, EventType, ForkFoundEvent,
    MatchBundleEvent, MatchMonitoringEvent,
};
pub use errors::CodecError;
pub use topics::{Topic, TopicPayload};
