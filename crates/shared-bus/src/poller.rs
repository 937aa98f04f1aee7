//! # Subscription Poller
//!
//! One task per subscribed topic. Pulls bounded batches from the topic's
//! durable consumer, dispatches each message to the registered handler and
//! settles it.
//!
//! ```text
//!         ┌──────────── tick (poll_interval) ◄──────────────┐
//!         ▼                                                 │
//!   fetch(batch, max_wait) ── timeout / empty ──────────────┤
//!         │                                                 │
//!         ▼ for each message, in order                      │
//!   lookup(topic) ── none ──► ack (unhandled) ──────────────┤
//!         │                                                 │
//!         ▼                                                 │
//!   decode + handle ── ok ──► ack ──────────────────────────┤
//!         │                                                 │
//!         └──────── err ───► nak (broker redelivers) ───────┘
//! ```
//!
//! The next fetch only starts after the previous batch is settled, so a slow
//! handler cannot pile up in-flight messages. Per-message failures never
//! leave the loop; it exits only when stopped or when its subscription is
//! closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use shared_types::Topic;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::error::{FetchError, SettleError};
use crate::metrics::BusMetrics;
use crate::ports::outbound::{Delivery, PullSubscription};
use crate::registry::HandlerRegistry;

/// Fetch settings shared by every poller of a client.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollSettings {
    pub batch_size: usize,
    pub fetch_max_wait: Duration,
    pub poll_interval: Duration,
    pub max_deliver: u64,
}

/// Stop conditions of one poller: the client-wide shutdown signal and the
/// poller's own unsubscribe signal. A dropped sender counts as stopped.
pub(crate) struct StopSignals {
    shutdown: watch::Receiver<bool>,
    unsubscribed: watch::Receiver<bool>,
}

impl StopSignals {
    pub(crate) fn new(shutdown: watch::Receiver<bool>, unsubscribed: watch::Receiver<bool>) -> Self {
        Self {
            shutdown,
            unsubscribed,
        }
    }

    /// Resolves once either signal fires.
    async fn stopped(&mut self) {
        tokio::select! {
            _ = self.shutdown.wait_for(|stop| *stop) => {}
            _ = self.unsubscribed.wait_for(|stop| *stop) => {}
        }
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow() || *self.unsubscribed.borrow()
    }
}

pub(crate) struct Poller {
    topic: Topic,
    consumer: String,
    subscription: Arc<dyn PullSubscription>,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<BusMetrics>,
    settings: PollSettings,
}

impl Poller {
    pub(crate) fn new(
        topic: Topic,
        consumer: String,
        subscription: Arc<dyn PullSubscription>,
        registry: Arc<HandlerRegistry>,
        metrics: Arc<BusMetrics>,
        settings: PollSettings,
    ) -> Self {
        Self {
            topic,
            consumer,
            subscription,
            registry,
            metrics,
            settings,
        }
    }

    /// Poll until stopped or the subscription closes.
    pub(crate) async fn run(self, mut signals: StopSignals) {
        debug!(topic = %self.topic, consumer = %self.consumer, "Poller started");

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = signals.stopped() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                () = signals.stopped() => break,
                result = self.subscription.fetch(
                    self.settings.batch_size,
                    self.settings.fetch_max_wait,
                ) => result,
            };

            match fetched {
                Ok(batch) => {
                    self.metrics.record_delivered(self.topic, batch.len());
                    for delivery in batch {
                        if signals.is_stopped() {
                            break;
                        }
                        self.process(delivery.as_ref()).await;
                    }
                }
                Err(FetchError::Timeout | FetchError::NoMessages) => {}
                Err(FetchError::Closed) => {
                    debug!(topic = %self.topic, "Subscription closed");
                    break;
                }
                Err(FetchError::Broker(error)) => {
                    self.metrics.record_fetch_error(self.topic);
                    warn!(
                        topic = %self.topic,
                        consumer = %self.consumer,
                        error = %error,
                        "Fetch failed"
                    );
                }
            }
        }

        debug!(topic = %self.topic, consumer = %self.consumer, "Poller stopped");
    }

    /// Dispatch one message and settle it.
    async fn process(&self, delivery: &dyn Delivery) {
        let sequence = delivery.stream_sequence();
        let delivered = delivery.delivered();

        let Some(handler) = self.registry.lookup(self.topic) else {
            error!(
                topic = %self.topic,
                sequence,
                "No handler registered, acknowledging message"
            );
            self.metrics.record_unhandled(self.topic);
            if let Err(e) = ack(delivery).await {
                self.settle_failed(&e);
            }
            return;
        };

        debug!(topic = %self.topic, sequence, delivered, "Processing message");

        let started = Instant::now();
        let outcome = handler.dispatch(delivery.payload()).await;
        self.metrics
            .record_handler_duration(self.topic, started.elapsed());

        match outcome {
            Ok(()) => match ack(delivery).await {
                Ok(()) => self.metrics.record_acked(self.topic),
                Err(e) => self.settle_failed(&e),
            },
            Err(failure) => {
                error!(
                    topic = %self.topic,
                    sequence,
                    delivered,
                    error = %failure,
                    "Failed to handle message"
                );
                self.metrics.record_nacked(self.topic, &failure);
                if delivered >= self.settings.max_deliver {
                    warn!(
                        topic = %self.topic,
                        sequence,
                        delivered,
                        "Message reached max deliveries and will not be redelivered"
                    );
                }
                if let Err(e) = nak(delivery).await {
                    self.settle_failed(&e);
                }
            }
        }
    }

    fn settle_failed(&self, error: &SettleError) {
        error!(topic = %self.topic, error = %error, "Failed to settle message");
        self.metrics.record_settle_failure(self.topic, error);
    }
}

async fn ack(delivery: &dyn Delivery) -> Result<(), SettleError> {
    delivery
        .ack()
        .await
        .map_err(|source| SettleError::AckFailure {
            sequence: delivery.stream_sequence(),
            source,
        })
}

async fn nak(delivery: &dyn Delivery) -> Result<(), SettleError> {
    delivery
        .nak()
        .await
        .map_err(|source| SettleError::NakFailure {
            sequence: delivery.stream_sequence(),
            source,
        })
}
