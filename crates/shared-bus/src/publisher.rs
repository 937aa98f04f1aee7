//! # Event Publisher
//!
//! Stamps a payload into an envelope, encodes it and hands it to the broker's
//! publish-with-ack. No buffering and no retry: a failure is returned to the
//! caller, who owns the retry policy.

use std::sync::Arc;

use shared_types::{encode, CorrelationId, Envelope, EnvelopeBuilder, TopicPayload};
use tracing::{debug, error};

use crate::error::{BusError, PublishError};
use crate::metrics::BusMetrics;
use crate::ports::outbound::{Broker, PublishAck};

/// Publishes typed envelopes on their fixed topics.
pub struct Publisher {
    broker: Arc<dyn Broker>,
    builder: EnvelopeBuilder,
    metrics: Arc<BusMetrics>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, builder: EnvelopeBuilder, metrics: Arc<BusMetrics>) -> Self {
        Self {
            broker,
            builder,
            metrics,
        }
    }

    #[must_use]
    pub fn builder(&self) -> &EnvelopeBuilder {
        &self.builder
    }

    /// Publish `payload` on its topic under `correlation_id`.
    ///
    /// Returns the stream and sequence the broker stored the event at.
    pub async fn publish<P: TopicPayload>(
        &self,
        payload: P,
        correlation_id: CorrelationId,
    ) -> Result<PublishAck, BusError> {
        let topic = P::TOPIC;
        let envelope = self.builder.build(payload, correlation_id);

        match self.send(&envelope).await {
            Ok(ack) => {
                debug!(
                    topic = %topic,
                    event_id = %envelope.event_id(),
                    correlation_id,
                    stream = %ack.stream,
                    sequence = ack.sequence,
                    "Event published"
                );
                self.metrics.record_published(topic);
                Ok(ack)
            }
            Err(source) => {
                error!(
                    topic = %topic,
                    event_id = %envelope.event_id(),
                    correlation_id,
                    error = %source,
                    "Failed to publish event"
                );
                self.metrics.record_publish_failure(topic);
                Err(BusError::PublishFailure { topic, source })
            }
        }
    }

    async fn send<P: TopicPayload>(&self, envelope: &Envelope<P>) -> Result<PublishAck, PublishError> {
        let body = encode(envelope)?;
        Ok(self.broker.publish(P::TOPIC.subject(), body).await?)
    }
}
