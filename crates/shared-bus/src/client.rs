//! # Event Bus Client
//!
//! Owns the broker connection, the shared shutdown signal, the handler
//! registry and one poller per subscribed topic.
//!
//! ## Lifecycle
//!
//! ```text
//! connect ──► Open ──close()──► Closing ──► Closed
//!              │                  │
//!              │ publish          ├─ signal pollers to stop
//!              │ subscribe        ├─ unsubscribe all (best effort)
//!              │ unsubscribe      ├─ wait for pollers (bounded)
//!              │                  └─ close broker connection
//! ```
//!
//! The lifecycle flag and the subscription list live behind one async
//! `RwLock`. Publishes hold the read side while the broker confirms, so
//! `close` never races an in-flight publish; subscribe, unsubscribe and the
//! state transitions take the write side. The lock is never held while
//! waiting for pollers, so a handler that publishes cannot stall shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bus_telemetry::BUS_ACTIVE_SUBSCRIPTIONS;
use parking_lot::Mutex;
use shared_types::{
    CorrelationId, EnvelopeBuilder, Fork, MatchBundle, MatchMonitoring, Topic, TopicPayload,
};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::BusConfig;
use crate::diagnostics::{BusDiagnostics, Lifecycle};
use crate::error::{BrokerError, BusError};
use crate::handler::{MessageHandler, PipelineAdapter, TypedHandler};
use crate::metrics::BusMetrics;
use crate::poller::{PollSettings, Poller, StopSignals};
use crate::ports::inbound::{EventConsumer, EventHandler, EventPublisher, PipelineHandler};
use crate::ports::outbound::{
    Broker, ConnectOptions, Connector, ConsumerSpec, PublishAck, PullSubscription, StreamSpec,
};
use crate::publisher::Publisher;
use crate::registry::HandlerRegistry;

/// Connected event-bus client. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct EventBusClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: BusConfig,
    broker: Arc<dyn Broker>,
    publisher: Publisher,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<BusMetrics>,
    state: RwLock<ClientState>,
    shutdown: watch::Sender<bool>,
    pollers: Mutex<JoinSet<()>>,
}

struct ClientState {
    lifecycle: Lifecycle,
    subscriptions: BTreeMap<Topic, ActiveSubscription>,
}

struct ActiveSubscription {
    consumer: String,
    subscription: Arc<dyn PullSubscription>,
    /// Dropping it stops the topic's poller.
    stop: watch::Sender<bool>,
}

impl EventBusClient {
    /// Connect to the broker and provision the stream.
    ///
    /// # Errors
    ///
    /// - `BusError::Config` if the configuration is invalid
    /// - `BusError::ConnectFailure` if the broker is unreachable within
    ///   `connect_timeout` or the stream cannot be created
    pub async fn connect(config: BusConfig, connector: &dyn Connector) -> Result<Self, BusError> {
        config.validate()?;

        let options = ConnectOptions::from(&config);
        let broker = match tokio::time::timeout(config.connect_timeout, connector.connect(&options))
            .await
        {
            Ok(Ok(broker)) => broker,
            Ok(Err(source)) => {
                return Err(BusError::ConnectFailure {
                    url: config.url.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(BusError::ConnectFailure {
                    url: config.url.clone(),
                    source: BrokerError::Timeout(config.connect_timeout),
                })
            }
        };

        if config.ensure_stream {
            if let Err(source) = broker.ensure_stream(&StreamSpec::from(&config)).await {
                if let Err(e) = broker.close().await {
                    debug!(error = %e, "Failed to close connection after stream setup failure");
                }
                return Err(BusError::ConnectFailure {
                    url: config.url.clone(),
                    source,
                });
            }
        }

        info!(
            url = %config.url,
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            group = %config.consumer_group,
            "Connected to event bus"
        );

        let metrics = Arc::new(BusMetrics::new());
        let builder = EnvelopeBuilder::new(&config.service_name, &config.protocol_version);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                publisher: Publisher::new(broker.clone(), builder, metrics.clone()),
                broker,
                registry: Arc::new(HandlerRegistry::new()),
                metrics,
                state: RwLock::new(ClientState {
                    lifecycle: Lifecycle::Open,
                    subscriptions: BTreeMap::new(),
                }),
                shutdown,
                pollers: Mutex::new(JoinSet::new()),
                config,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }

    pub async fn state(&self) -> Lifecycle {
        self.inner.state.read().await.lifecycle
    }

    /// Open and the broker reports a live connection.
    pub async fn is_connected(&self) -> bool {
        self.state().await == Lifecycle::Open && self.inner.broker.is_connected()
    }

    // =========================================================================
    // PUBLISH
    // =========================================================================

    /// Publish a payload on its topic under an explicit correlation id.
    ///
    /// # Errors
    ///
    /// `BusError::ClientClosed` once `close` has started, otherwise
    /// `BusError::PublishFailure`.
    pub async fn publish<P: TopicPayload>(
        &self,
        payload: P,
        correlation_id: CorrelationId,
    ) -> Result<PublishAck, BusError> {
        let state = self.inner.state.read().await;
        if state.lifecycle != Lifecycle::Open {
            return Err(BusError::ClientClosed);
        }
        self.inner.publisher.publish(payload, correlation_id).await
    }

    pub async fn publish_match_bundle(&self, bundle: MatchBundle) -> Result<PublishAck, BusError> {
        let correlation_id = bundle.correlation_id;
        self.publish(bundle, correlation_id).await
    }

    pub async fn publish_match_bundle_correlated(
        &self,
        bundle: MatchBundle,
        correlation_id: CorrelationId,
    ) -> Result<PublishAck, BusError> {
        self.publish(bundle, correlation_id).await
    }

    pub async fn publish_match_monitoring(
        &self,
        monitoring: MatchMonitoring,
    ) -> Result<PublishAck, BusError> {
        let correlation_id = monitoring.correlation_id;
        self.publish(monitoring, correlation_id).await
    }

    pub async fn publish_match_monitoring_correlated(
        &self,
        monitoring: MatchMonitoring,
        correlation_id: CorrelationId,
    ) -> Result<PublishAck, BusError> {
        self.publish(monitoring, correlation_id).await
    }

    pub async fn publish_fork_found(&self, fork: Fork) -> Result<PublishAck, BusError> {
        let correlation_id = fork.correlation_id;
        self.publish(fork, correlation_id).await
    }

    pub async fn publish_fork_found_correlated(
        &self,
        fork: Fork,
        correlation_id: CorrelationId,
    ) -> Result<PublishAck, BusError> {
        self.publish(fork, correlation_id).await
    }

    // =========================================================================
    // SUBSCRIBE
    // =========================================================================

    /// Register `handler` for the payload's topic and start polling it.
    ///
    /// Subscribing a topic that is already subscribed replaces its handler.
    ///
    /// # Errors
    ///
    /// `BusError::ClientClosed` once `close` has started, or
    /// `BusError::ConsumerSetupFailure` if the durable consumer cannot be
    /// created or bound.
    pub async fn subscribe<P, H>(&self, handler: H) -> Result<(), BusError>
    where
        P: TopicPayload,
        H: EventHandler<P>,
    {
        self.subscribe_topic(P::TOPIC, Arc::new(TypedHandler::<P, H>::new(handler)))
            .await
    }

    pub async fn subscribe_match_bundle<H>(&self, handler: H) -> Result<(), BusError>
    where
        H: EventHandler<MatchBundle>,
    {
        self.subscribe::<MatchBundle, H>(handler).await
    }

    pub async fn subscribe_match_monitoring<H>(&self, handler: H) -> Result<(), BusError>
    where
        H: EventHandler<MatchMonitoring>,
    {
        self.subscribe::<MatchMonitoring, H>(handler).await
    }

    pub async fn subscribe_fork_found<H>(&self, handler: H) -> Result<(), BusError>
    where
        H: EventHandler<Fork>,
    {
        self.subscribe::<Fork, H>(handler).await
    }

    /// Subscribe one handler to all three topics.
    pub async fn subscribe_pipeline(&self, handler: Arc<dyn PipelineHandler>) -> Result<(), BusError> {
        let adapter = PipelineAdapter(handler);
        self.subscribe::<MatchBundle, _>(adapter.clone()).await?;
        self.subscribe::<MatchMonitoring, _>(adapter.clone()).await?;
        self.subscribe::<Fork, _>(adapter).await
    }

    async fn subscribe_topic(
        &self,
        topic: Topic,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        let mut state = self.inner.state.write().await;
        if state.lifecycle != Lifecycle::Open {
            return Err(BusError::ClientClosed);
        }

        if state.subscriptions.contains_key(&topic) {
            self.inner.registry.register(topic, handler);
            info!(topic = %topic, "Handler replaced");
            return Ok(());
        }

        let config = &self.inner.config;
        let consumer = config.durable_name(topic);
        let spec = ConsumerSpec {
            stream: config.stream_name.clone(),
            durable: consumer.clone(),
            filter_subject: topic.subject().to_string(),
            ack_wait: config.ack_wait,
            max_deliver: config.max_deliver,
            max_ack_pending: config.max_ack_pending,
        };

        match self.inner.broker.ensure_consumer(&spec).await {
            Ok(()) => debug!(topic = %topic, consumer = %consumer, "Consumer created"),
            Err(BrokerError::ConsumerAlreadyExists(_)) => {
                warn!(topic = %topic, consumer = %consumer, "Consumer already exists, binding to it");
            }
            Err(source) => {
                return Err(BusError::ConsumerSetupFailure {
                    topic,
                    consumer,
                    source,
                })
            }
        }

        let subscription = self
            .inner
            .broker
            .bind_pull(&config.stream_name, &consumer, topic.subject())
            .await
            .map_err(|source| BusError::ConsumerSetupFailure {
                topic,
                consumer: consumer.clone(),
                source,
            })?;

        self.inner.registry.register(topic, handler);

        let (stop, stopped) = watch::channel(false);
        let poller = Poller::new(
            topic,
            consumer.clone(),
            subscription.clone(),
            self.inner.registry.clone(),
            self.inner.metrics.clone(),
            PollSettings {
                batch_size: config.pull_batch_size,
                fetch_max_wait: config.fetch_max_wait,
                poll_interval: config.poll_interval,
                max_deliver: u64::try_from(config.max_deliver).unwrap_or(1),
            },
        );
        let signals = StopSignals::new(self.inner.shutdown.subscribe(), stopped);
        {
            let mut pollers = self.inner.pollers.lock();
            // Reap pollers of earlier unsubscribes.
            while let Some(finished) = pollers.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "Poller task failed");
                }
            }
            pollers.spawn(poller.run(signals));
        }

        state.subscriptions.insert(
            topic,
            ActiveSubscription {
                consumer: consumer.clone(),
                subscription,
                stop,
            },
        );
        BUS_ACTIVE_SUBSCRIPTIONS.inc();

        info!(
            topic = %topic,
            consumer = %consumer,
            stream = %config.stream_name,
            "Subscribed"
        );
        Ok(())
    }

    // =========================================================================
    // UNSUBSCRIBE
    // =========================================================================

    /// Stop polling one topic and remove its handler.
    ///
    /// Returns `Ok(false)` if the topic was not subscribed. The poller stops
    /// even when the broker-side cancellation fails.
    pub async fn unsubscribe(&self, topic: Topic) -> Result<bool, BusError> {
        let mut state = self.inner.state.write().await;
        let Some(active) = state.subscriptions.remove(&topic) else {
            return Ok(false);
        };
        self.inner.registry.remove(topic);

        cancel(topic, active).await?;
        info!(topic = %topic, "Unsubscribed");
        Ok(true)
    }

    /// Cancel every subscription and clear the registry.
    ///
    /// Best effort: every subscription is attempted; the last failure is
    /// returned.
    pub async fn unsubscribe_all(&self) -> Result<(), BusError> {
        let mut state = self.inner.state.write().await;
        let subscriptions = std::mem::take(&mut state.subscriptions);

        let mut last_error = None;
        for (topic, active) in subscriptions {
            if let Err(e) = cancel(topic, active).await {
                last_error = Some(e);
            }
        }
        self.inner.registry.clear();

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Stop all pollers and close the connection.
    ///
    /// Idempotent: calls after the first return `Ok(())` immediately.
    /// Unsubscribe failures and a poller wait longer than
    /// `shutdown_timeout` are logged; close always completes.
    pub async fn close(&self) -> Result<(), BusError> {
        {
            let mut state = self.inner.state.write().await;
            if state.lifecycle != Lifecycle::Open {
                return Ok(());
            }
            state.lifecycle = Lifecycle::Closing;
        }
        info!("Closing event bus client");

        self.inner.shutdown.send_replace(true);

        if let Err(e) = self.unsubscribe_all().await {
            error!(error = %e, "Unsubscribe failed during close");
        }

        let mut pollers = std::mem::take(&mut *self.inner.pollers.lock());
        let timeout = self.inner.config.shutdown_timeout;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = pollers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Poller task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                timeout = ?timeout,
                remaining = pollers.len(),
                "Timed out waiting for pollers to stop"
            );
            pollers.abort_all();
        }

        if let Err(e) = self.inner.broker.close().await {
            warn!(error = %e, "Failed to close broker connection");
        }

        self.inner.state.write().await.lifecycle = Lifecycle::Closed;
        info!("Event bus client closed");
        Ok(())
    }

    // =========================================================================
    // DIAGNOSTICS
    // =========================================================================

    /// Connection and subscription report. Stream totals are best effort.
    pub async fn diagnostics(&self) -> BusDiagnostics {
        let state = self.inner.state.read().await;
        let stream = &self.inner.config.stream_name;

        let stream_stats = if state.lifecycle == Lifecycle::Open {
            match self.inner.broker.stream_info(stream).await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Failed to fetch stream info");
                    None
                }
            }
        } else {
            None
        };

        BusDiagnostics {
            state: state.lifecycle,
            is_connected: state.lifecycle == Lifecycle::Open && self.inner.broker.is_connected(),
            url: self.inner.broker.connected_url(),
            stream: stream.clone(),
            subscriptions: state.subscriptions.len(),
            handlers: self.inner.registry.len(),
            topics: state
                .subscriptions
                .keys()
                .map(|t| t.subject().to_string())
                .collect(),
            stream_stats,
            metrics: self.inner.metrics.snapshot(),
        }
    }
}

/// Stop a subscription's poller and cancel it at the broker.
async fn cancel(topic: Topic, active: ActiveSubscription) -> Result<(), BusError> {
    active.stop.send_replace(true);
    BUS_ACTIVE_SUBSCRIPTIONS.dec();

    active.subscription.unsubscribe().await.map_err(|source| {
        error!(
            topic = %topic,
            consumer = %active.consumer,
            error = %source,
            "Failed to unsubscribe"
        );
        BusError::UnsubscribeFailure { topic, source }
    })
}

#[async_trait]
impl EventPublisher for EventBusClient {
    async fn publish_match_bundle(&self, bundle: MatchBundle) -> Result<PublishAck, BusError> {
        EventBusClient::publish_match_bundle(self, bundle).await
    }

    async fn publish_match_monitoring(
        &self,
        monitoring: MatchMonitoring,
    ) -> Result<PublishAck, BusError> {
        EventBusClient::publish_match_monitoring(self, monitoring).await
    }

    async fn publish_fork_found(&self, fork: Fork) -> Result<PublishAck, BusError> {
        EventBusClient::publish_fork_found(self, fork).await
    }

    async fn close(&self) -> Result<(), BusError> {
        EventBusClient::close(self).await
    }
}

#[async_trait]
impl EventConsumer for EventBusClient {
    async fn subscribe_match_bundle(
        &self,
        handler: Arc<dyn EventHandler<MatchBundle>>,
    ) -> Result<(), BusError> {
        self.subscribe::<MatchBundle, _>(handler).await
    }

    async fn subscribe_match_monitoring(
        &self,
        handler: Arc<dyn EventHandler<MatchMonitoring>>,
    ) -> Result<(), BusError> {
        self.subscribe::<MatchMonitoring, _>(handler).await
    }

    async fn subscribe_fork_found(
        &self,
        handler: Arc<dyn EventHandler<Fork>>,
    ) -> Result<(), BusError> {
        self.subscribe::<Fork, _>(handler).await
    }

    async fn subscribe_pipeline(&self, handler: Arc<dyn PipelineHandler>) -> Result<(), BusError> {
        EventBusClient::subscribe_pipeline(self, handler).await
    }

    async fn unsubscribe_all(&self) -> Result<(), BusError> {
        EventBusClient::unsubscribe_all(self).await
    }

    async fn close(&self) -> Result<(), BusError> {
        EventBusClient::close(self).await
    }
}

/// Connect once and hand out the publisher and consumer views.
pub async fn factory(
    config: BusConfig,
    connector: &dyn Connector,
) -> Result<(Arc<dyn EventPublisher>, Arc<dyn EventConsumer>), BusError> {
    let client = EventBusClient::connect(config, connector).await?;
    Ok((Arc::new(client.clone()), Arc::new(client)))
}
