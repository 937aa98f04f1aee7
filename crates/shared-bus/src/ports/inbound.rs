//! # Inbound Ports
//!
//! Handler traits implemented by subscribers, and the publisher/consumer
//! views a client exposes to the rest of the pipeline.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use shared_types::{
    Envelope, Fork, ForkFoundEvent, MatchBundle, MatchBundleEvent, MatchMonitoring,
    MatchMonitoringEvent,
};

use crate::error::BusError;
use crate::ports::outbound::PublishAck;

/// Handles envelopes of one payload type.
///
/// Returning an error naks the message so the broker redelivers it.
#[async_trait]
pub trait EventHandler<P: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, event: Envelope<P>) -> anyhow::Result<()>;
}

#[async_trait]
impl<P, H> EventHandler<P> for Arc<H>
where
    P: Send + 'static,
    H: EventHandler<P> + ?Sized,
{
    async fn handle(&self, event: Envelope<P>) -> anyhow::Result<()> {
        (**self).handle(event).await
    }
}

/// An `EventHandler` backed by an async closure.
pub struct FnHandler<F, P> {
    f: F,
    _payload: PhantomData<fn(P)>,
}

/// Wrap an async closure as an `EventHandler`.
pub fn handler_fn<P, F, Fut>(f: F) -> FnHandler<F, P>
where
    F: Fn(Envelope<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        f,
        _payload: PhantomData,
    }
}

#[async_trait]
impl<P, F, Fut> EventHandler<P> for FnHandler<F, P>
where
    P: Send + 'static,
    F: Fn(Envelope<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Envelope<P>) -> anyhow::Result<()> {
        (self.f)(event).await
    }
}

/// One handler for every event kind of the pipeline.
#[async_trait]
pub trait PipelineHandler: Send + Sync + 'static {
    async fn handle_match_bundle_found(&self, event: MatchBundleEvent) -> anyhow::Result<()>;

    async fn handle_match_monitoring(&self, event: MatchMonitoringEvent) -> anyhow::Result<()>;

    async fn handle_fork_found(&self, event: ForkFoundEvent) -> anyhow::Result<()>;
}

/// Publishing view of a client.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_match_bundle(&self, bundle: MatchBundle) -> Result<PublishAck, BusError>;

    async fn publish_match_monitoring(
        &self,
        monitoring: MatchMonitoring,
    ) -> Result<PublishAck, BusError>;

    async fn publish_fork_found(&self, fork: Fork) -> Result<PublishAck, BusError>;

    async fn close(&self) -> Result<(), BusError>;
}

/// Consuming view of a client.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn subscribe_match_bundle(
        &self,
        handler: Arc<dyn EventHandler<MatchBundle>>,
    ) -> Result<(), BusError>;

    async fn subscribe_match_monitoring(
        &self,
        handler: Arc<dyn EventHandler<MatchMonitoring>>,
    ) -> Result<(), BusError>;

    async fn subscribe_fork_found(
        &self,
        handler: Arc<dyn EventHandler<Fork>>,
    ) -> Result<(), BusError>;

    /// Subscribe one handler to all three topics.
    async fn subscribe_pipeline(&self, handler: Arc<dyn PipelineHandler>) -> Result<(), BusError>;

    async fn unsubscribe_all(&self) -> Result<(), BusError>;

    async fn close(&self) -> Result<(), BusError>;
}
