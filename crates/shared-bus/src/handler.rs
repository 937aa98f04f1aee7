//! # Handler Dispatch
//!
//! Pollers see raw message bodies; callers write typed handlers. A
//! `MessageHandler` closes that gap for one topic: decode the body into the
//! topic's envelope, run the handler, and report the outcome as a
//! `DispatchError` the poller turns into ack or nak.
//!
//! A panicking handler is caught and reported as a failure so the poller
//! keeps running.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use shared_types::{
    decode, Fork, ForkFoundEvent, MatchBundle, MatchBundleEvent, MatchMonitoring,
    MatchMonitoringEvent, TopicPayload,
};

use crate::error::DispatchError;
use crate::ports::inbound::{EventHandler, PipelineHandler};

/// Type-erased handler bound to one topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Decode and handle one message body.
    async fn dispatch(&self, body: &[u8]) -> Result<(), DispatchError>;
}

/// Decodes `Envelope<P>` and forwards it to an `EventHandler<P>`.
pub struct TypedHandler<P, H> {
    handler: H,
    _payload: PhantomData<fn() -> P>,
}

impl<P, H> TypedHandler<P, H>
where
    P: TopicPayload,
    H: EventHandler<P>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P, H> MessageHandler for TypedHandler<P, H>
where
    P: TopicPayload,
    H: EventHandler<P>,
{
    async fn dispatch(&self, body: &[u8]) -> Result<(), DispatchError> {
        let envelope = decode::<P>(body)?;

        match AssertUnwindSafe(self.handler.handle(envelope))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DispatchError::Handler(e)),
            Err(panic) => Err(DispatchError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Routes each event kind to the matching `PipelineHandler` method.
#[derive(Clone)]
pub struct PipelineAdapter(pub Arc<dyn PipelineHandler>);

#[async_trait]
impl EventHandler<MatchBundle> for PipelineAdapter {
    async fn handle(&self, event: MatchBundleEvent) -> anyhow::Result<()> {
        self.0.handle_match_bundle_found(event).await
    }
}

#[async_trait]
impl EventHandler<MatchMonitoring> for PipelineAdapter {
    async fn handle(&self, event: MatchMonitoringEvent) -> anyhow::Result<()> {
        self.0.handle_match_monitoring(event).await
    }
}

#[async_trait]
impl EventHandler<Fork> for PipelineAdapter {
    async fn handle(&self, event: ForkFoundEvent) -> anyhow::Result<()> {
        self.0.handle_fork_found(event).await
    }
}
