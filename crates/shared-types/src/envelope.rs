//! # Event Envelope
//!
//! The wrapper for every message on the bus: one `EventHeader` plus one typed
//! payload. One envelope is exactly one wire message.
//!
//! ## Wire Shape
//!
//! ```text
//! {
//!   "event_header": {
//!     "event_id": "<uuid>",
//!     "event_type": "fork.found",
//!     "timestamp": "<RFC3339 UTC>",
//!     "source": "<service>",
//!     "version": "1.0.0",
//!     "correlation_id": 42
//!   },
//!   "payload": { ... topic-specific ... }
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{CorrelationId, Fork, MatchBundle, MatchMonitoring};
use crate::errors::CodecError;

/// Tag identifying the kind of event carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "match.bundle")]
    MatchBundle,
    #[serde(rename = "match.monitoring")]
    MatchMonitoring,
    #[serde(rename = "fork.found")]
    ForkFound,
}

impl EventType {
    /// The tag as written on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MatchBundle => "match.bundle",
            Self::MatchMonitoring => "match.monitoring",
            Self::ForkFound => "fork.found",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata stamped on every event. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Unique per event instance; never reused.
    pub event_id: Uuid,
    pub event_type: EventType,
    /// Creation time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Name of the publishing service.
    pub source: String,
    /// Protocol version of the envelope.
    pub version: String,
    pub correlation_id: CorrelationId,
}

/// A header paired with one typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub event_header: EventHeader,
    pub payload: P,
}

impl<P> Envelope<P> {
    /// The event identifier.
    #[must_use]
    pub fn event_id(&self) -> Uuid {
        self.event_header.event_id
    }

    /// The correlation identifier.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.event_header.correlation_id
    }
}

pub type MatchBundleEvent = Envelope<MatchBundle>;
pub type MatchMonitoringEvent = Envelope<MatchMonitoring>;
pub type ForkFoundEvent = Envelope<Fork>;

/// An envelope of any of the three kinds, resolved from its header tag.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyEnvelope {
    MatchBundle(MatchBundleEvent),
    MatchMonitoring(MatchMonitoringEvent),
    ForkFound(ForkFoundEvent),
}

impl AnyEnvelope {
    /// The header of the wrapped envelope.
    #[must_use]
    pub fn header(&self) -> &EventHeader {
        match self {
            Self::MatchBundle(e) => &e.event_header,
            Self::MatchMonitoring(e) => &e.event_header,
            Self::ForkFound(e) => &e.event_header,
        }
    }
}

/// Serialize an envelope into its JSON wire body.
pub fn encode<P: Serialize>(envelope: &Envelope<P>) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(|source| CodecError::Encode {
        event_type: envelope.event_header.event_type,
        source,
    })
}

/// Parse a wire body into an envelope of a known payload type.
pub fn decode<P: DeserializeOwned>(data: &[u8]) -> Result<Envelope<P>, CodecError> {
    serde_json::from_slice(data).map_err(|source| CodecError::Decode {
        expected: std::any::type_name::<P>(),
        source,
    })
}

/// Parse a wire body whose payload type is only known from its header.
pub fn decode_any(data: &[u8]) -> Result<AnyEnvelope, CodecError> {
    #[derive(Deserialize)]
    struct Peek {
        event_header: PeekHeader,
    }

    #[derive(Deserialize)]
    struct PeekHeader {
        event_type: EventType,
    }

    let peek: Peek = serde_json::from_slice(data).map_err(|source| CodecError::Decode {
        expected: "envelope",
        source,
    })?;

    Ok(match peek.event_header.event_type {
        EventType::MatchBundle => AnyEnvelope::MatchBundle(decode(data)?),
        EventType::MatchMonitoring => AnyEnvelope::MatchMonitoring(decode(data)?),
        EventType::ForkFound => AnyEnvelope::ForkFound(decode(data)?),
    })
}
