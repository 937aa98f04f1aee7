//! # NATS JetStream Adapter
//!
//! Implements the broker port with `async-nats`.
//!
//! | Port call | JetStream call |
//! |-----------|----------------|
//! | `connect` | `ConnectOptions::connect` + `jetstream::new` |
//! | `ensure_stream` | `get_or_create_stream` |
//! | `ensure_consumer` | `get_consumer` then `create_consumer` |
//! | `bind_pull` | `get_consumer::<pull::Config>` |
//! | `fetch` | `fetch().max_messages(n).expires(d)` |
//! | `ack` / `nak` | `ack()` / `ack_with(AckKind::Nak(None))` |
//! | `publish` | `publish(..).await?.await?` |
//! | `close` | `flush()`, then drop every client handle |
//!
//! The connection task of `async-nats` runs until the last `Client` clone is
//! dropped, so the broker and its subscriptions keep their handles in a
//! [`Slot`] that `close`/`unsubscribe` empties.

use std::sync::Arc;
use std::time::Duration;

use async_nats::connection::State as ConnectionState;
use async_nats::jetstream::{self, consumer, stream, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BrokerError, FetchError};
use crate::ports::outbound::{
    Broker, ConnectOptions, Connector, ConsumerSpec, Delivery, PublishAck, PullSubscription,
    StreamSpec, StreamStats,
};

fn request_error(error: impl std::fmt::Display) -> BrokerError {
    BrokerError::Request(error.to_string())
}

/// A handle that is shared until taken once.
struct Slot<T>(Mutex<Option<T>>);

impl<T: Clone> Slot<T> {
    fn new(value: T) -> Self {
        Self(Mutex::new(Some(value)))
    }

    fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }

    fn take(&self) -> Option<T> {
        self.0.lock().take()
    }
}

/// Opens NATS connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsConnector;

impl NatsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for NatsConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn Broker>, BrokerError> {
        let reconnect_wait = options.reconnect_wait;
        let client = async_nats::ConnectOptions::new()
            .name(&options.name)
            .connection_timeout(options.connect_timeout)
            .request_timeout(Some(options.request_timeout))
            .max_reconnects(options.max_reconnects)
            .reconnect_delay_callback(move |_attempts| reconnect_wait)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => warn!("NATS connection lost"),
                    async_nats::Event::Connected => debug!("NATS connection (re)established"),
                    other => debug!(event = %other, "NATS client event"),
                }
            })
            .connect(options.url.as_str())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let context = jetstream::new(client.clone());
        Ok(Arc::new(NatsBroker {
            link: Slot::new(Link { client, context }),
            url: options.url.clone(),
        }))
    }
}

#[derive(Clone)]
struct Link {
    client: async_nats::Client,
    context: jetstream::Context,
}

/// A NATS connection with its JetStream context.
pub struct NatsBroker {
    link: Slot<Link>,
    url: String,
}

impl NatsBroker {
    fn context(&self) -> Result<jetstream::Context, BrokerError> {
        self.link
            .get()
            .map(|link| link.context)
            .ok_or(BrokerError::Disconnected)
    }

    async fn stream(&self, name: &str) -> Result<stream::Stream, BrokerError> {
        self.context()?
            .get_stream(name)
            .await
            .map_err(|_| BrokerError::StreamNotFound(name.to_string()))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BrokerError> {
        self.context()?
            .get_or_create_stream(stream::Config {
                name: spec.name.clone(),
                subjects: spec.subjects.clone(),
                max_age: spec.max_age,
                num_replicas: spec.replicas,
                ..Default::default()
            })
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn ensure_consumer(&self, spec: &ConsumerSpec) -> Result<(), BrokerError> {
        let stream = self.stream(&spec.stream).await?;

        if stream
            .get_consumer::<consumer::pull::Config>(&spec.durable)
            .await
            .is_ok()
        {
            return Err(BrokerError::ConsumerAlreadyExists(spec.durable.clone()));
        }

        stream
            .create_consumer(consumer::pull::Config {
                durable_name: Some(spec.durable.clone()),
                filter_subject: spec.filter_subject.clone(),
                ack_policy: consumer::AckPolicy::Explicit,
                deliver_policy: consumer::DeliverPolicy::New,
                replay_policy: consumer::ReplayPolicy::Instant,
                ack_wait: spec.ack_wait,
                max_deliver: spec.max_deliver,
                max_ack_pending: spec.max_ack_pending,
                ..Default::default()
            })
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn bind_pull(
        &self,
        stream: &str,
        durable: &str,
        subject: &str,
    ) -> Result<Arc<dyn PullSubscription>, BrokerError> {
        let consumer = self
            .stream(stream)
            .await?
            .get_consumer::<consumer::pull::Config>(durable)
            .await
            .map_err(|_| BrokerError::ConsumerNotFound(durable.to_string()))?;

        Ok(Arc::new(NatsSubscription {
            consumer: Slot::new(consumer),
            subject: subject.to_string(),
        }))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, BrokerError> {
        let ack = self
            .context()?
            .publish(subject.to_string(), Bytes::from(payload))
            .await
            .map_err(request_error)?
            .await
            .map_err(request_error)?;

        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
        })
    }

    async fn stream_info(&self, stream: &str) -> Result<StreamStats, BrokerError> {
        let mut handle = self.stream(stream).await?;
        let info = handle.info().await.map_err(request_error)?;
        Ok(StreamStats {
            messages: info.state.messages,
            bytes: info.state.bytes,
        })
    }

    fn is_connected(&self) -> bool {
        self.link
            .get()
            .is_some_and(|link| link.client.connection_state() == ConnectionState::Connected)
    }

    fn connected_url(&self) -> String {
        self.url.clone()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let link = self.link.take().ok_or(BrokerError::Disconnected)?;
        let flushed = link.client.flush().await.map_err(request_error);
        drop(link);
        debug!(url = %self.url, "NATS connection released");
        flushed
    }
}

/// Pull subscription over a durable JetStream consumer.
///
/// Pull consumers hold no server-side interest, so unsubscribing only drops
/// the local handle; the durable survives.
pub struct NatsSubscription {
    consumer: Slot<consumer::Consumer<consumer::pull::Config>>,
    subject: String,
}

#[async_trait]
impl PullSubscription for NatsSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn fetch(
        &self,
        batch: usize,
        max_wait: Duration,
    ) -> Result<Vec<Box<dyn Delivery>>, FetchError> {
        let Some(consumer) = self.consumer.get() else {
            return Err(FetchError::Closed);
        };

        let mut messages = consumer
            .fetch()
            .max_messages(batch)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| FetchError::Broker(request_error(e)))?;

        let mut deliveries: Vec<Box<dyn Delivery>> = Vec::new();
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| FetchError::Broker(request_error(e)))?;
            let (delivered, stream_sequence) = message
                .info()
                .map(|info| (u64::try_from(info.delivered).unwrap_or(1), info.stream_sequence))
                .map_err(|e| FetchError::Broker(request_error(e)))?;

            deliveries.push(Box::new(NatsDelivery {
                subject: message.subject.to_string(),
                payload: message.payload.clone(),
                delivered,
                stream_sequence,
                message,
            }));
        }

        if deliveries.is_empty() {
            return Err(FetchError::NoMessages);
        }
        Ok(deliveries)
    }

    async fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.consumer.take();
        Ok(())
    }
}

/// A JetStream message awaiting settlement.
pub struct NatsDelivery {
    message: jetstream::Message,
    subject: String,
    payload: Bytes,
    delivered: u64,
    stream_sequence: u64,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivered(&self) -> u64 {
        self.delivered
    }

    fn stream_sequence(&self) -> u64 {
        self.stream_sequence
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.message.ack().await.map_err(request_error)
    }

    async fn nak(&self) -> Result<(), BrokerError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(request_error)
    }
}
