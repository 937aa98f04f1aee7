//! # Envelope Builder
//!
//! Stamps payloads into envelopes: fresh identifier, current UTC time, the
//! configured source and protocol version, and the caller's correlation id.

use chrono::Utc;
use uuid::Uuid;

use crate::entities::{CorrelationId, Fork, MatchBundle, MatchMonitoring};
use crate::envelope::{
    Envelope, EventHeader, EventType, ForkFoundEvent, MatchBundleEvent, MatchMonitoringEvent,
};
use crate::topics::TopicPayload;

/// Builds envelopes on behalf of one publishing service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeBuilder {
    source: String,
    version: String,
}

impl EnvelopeBuilder {
    pub fn new(source: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            version: version.into(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// A new header with a fresh identifier and the current time.
    #[must_use]
    pub fn header(&self, event_type: EventType, correlation_id: CorrelationId) -> EventHeader {
        EventHeader {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            source: self.source.clone(),
            version: self.version.clone(),
            correlation_id,
        }
    }

    /// Wrap a payload using the event tag of its topic.
    #[must_use]
    pub fn build<P: TopicPayload>(&self, payload: P, correlation_id: CorrelationId) -> Envelope<P> {
        Envelope {
            event_header: self.header(P::TOPIC.event_type(), correlation_id),
            payload,
        }
    }

    #[must_use]
    pub fn match_bundle_event(
        &self,
        bundle: MatchBundle,
        correlation_id: CorrelationId,
    ) -> MatchBundleEvent {
        self.build(bundle, correlation_id)
    }

    #[must_use]
    pub fn match_monitoring_event(
        &self,
        monitoring: MatchMonitoring,
        correlation_id: CorrelationId,
    ) -> MatchMonitoringEvent {
        self.build(monitoring, correlation_id)
    }

    #[must_use]
    pub fn fork_found_event(&self, fork: Fork, correlation_id: CorrelationId) -> ForkFoundEvent {
        self.build(fork, correlation_id)
    }
}
