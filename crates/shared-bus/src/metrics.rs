//! Per-client counters for publish, delivery and settlement.
//!
//! Every `record_*` call also feeds the process-wide Prometheus counters in
//! `bus-telemetry`, labelled by topic subject.
//!
//! ```ignore
//! let metrics = BusMetrics::new();
//! metrics.record_delivered(Topic::ForkFound, 2);
//! metrics.record_acked(Topic::ForkFound);
//! assert_eq!(metrics.snapshot().acked, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bus_telemetry::{
    metric_inc, metric_observe, BUS_FETCH_ERRORS, BUS_HANDLER_DURATION, BUS_MESSAGES_ACKED,
    BUS_MESSAGES_DELIVERED, BUS_MESSAGES_NACKED, BUS_MESSAGES_PUBLISHED, BUS_MESSAGES_UNHANDLED,
    BUS_PUBLISH_FAILURES, BUS_SETTLE_FAILURES,
};
use serde::{Deserialize, Serialize};
use shared_types::Topic;

use crate::error::{DispatchError, SettleError};

/// Thread-safe counters owned by one client.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Publishes confirmed by the broker
    pub published: AtomicU64,
    /// Publishes that failed to encode or were rejected
    pub publish_failures: AtomicU64,
    /// Messages fetched by pollers
    pub delivered: AtomicU64,
    /// Messages acknowledged after successful handling
    pub acked: AtomicU64,
    /// Messages negatively acknowledged
    pub nacked: AtomicU64,
    /// Messages acknowledged with no handler registered
    pub unhandled: AtomicU64,
    pub decode_failures: AtomicU64,
    pub handler_failures: AtomicU64,
    pub ack_failures: AtomicU64,
    pub nak_failures: AtomicU64,
    /// Fetches that failed for reasons other than an empty batch
    pub fetch_errors: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self, topic: Topic) {
        self.published.fetch_add(1, Ordering::Relaxed);
        metric_inc!(BUS_MESSAGES_PUBLISHED, &[topic.subject()]);
    }

    pub fn record_publish_failure(&self, topic: Topic) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        metric_inc!(BUS_PUBLISH_FAILURES, &[topic.subject()]);
    }

    /// Record a fetched batch of `count` messages.
    pub fn record_delivered(&self, topic: Topic, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
        BUS_MESSAGES_DELIVERED
            .with_label_values(&[topic.subject()])
            .inc_by(count as f64);
    }

    pub fn record_acked(&self, topic: Topic) {
        self.acked.fetch_add(1, Ordering::Relaxed);
        metric_inc!(BUS_MESSAGES_ACKED, &[topic.subject()]);
    }

    /// Record a nak and the failure that caused it.
    pub fn record_nacked(&self, topic: Topic, cause: &DispatchError) {
        self.nacked.fetch_add(1, Ordering::Relaxed);
        match cause {
            DispatchError::Decode(_) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
            }
            DispatchError::Handler(_) | DispatchError::Panicked(_) => {
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        metric_inc!(BUS_MESSAGES_NACKED, &[topic.subject(), cause.reason()]);
    }

    pub fn record_unhandled(&self, topic: Topic) {
        self.unhandled.fetch_add(1, Ordering::Relaxed);
        metric_inc!(BUS_MESSAGES_UNHANDLED, &[topic.subject()]);
    }

    pub fn record_settle_failure(&self, topic: Topic, error: &SettleError) {
        match error {
            SettleError::AckFailure { .. } => self.ack_failures.fetch_add(1, Ordering::Relaxed),
            SettleError::NakFailure { .. } => self.nak_failures.fetch_add(1, Ordering::Relaxed),
        };
        metric_inc!(BUS_SETTLE_FAILURES, &[topic.subject(), error.kind()]);
    }

    pub fn record_fetch_error(&self, topic: Topic) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
        metric_inc!(BUS_FETCH_ERRORS, &[topic.subject()]);
    }

    pub fn record_handler_duration(&self, topic: Topic, elapsed: Duration) {
        metric_observe!(BUS_HANDLER_DURATION, &[topic.subject()], elapsed.as_secs_f64());
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            nak_failures: self.nak_failures.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `BusMetrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    pub delivered: u64,
    pub acked: u64,
    pub nacked: u64,
    pub unhandled: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
    pub ack_failures: u64,
    pub nak_failures: u64,
    pub fetch_errors: u64,
}
