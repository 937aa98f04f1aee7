//! # Error Types
//!
//! Errors raised while turning envelopes into wire bytes and back.

use thiserror::Error;

use crate::envelope::EventType;

/// Errors from the envelope codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The envelope could not be serialized.
    #[error("failed to encode {event_type} event: {source}")]
    Encode {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },

    /// The message body is not a valid envelope of the expected shape.
    #[error("failed to decode {expected} event: {source}")]
    Decode {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
