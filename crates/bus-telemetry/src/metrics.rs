//! Prometheus metrics for the event bus.
//!
//! All metrics follow the naming convention: `bus_<metric>_<unit>` and carry a
//! `topic` label holding the broker subject.
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_acked_total)
//! - **Gauge**: Value that can go up or down (e.g., active_subscriptions)
//! - **Histogram**: Distribution of values (e.g., handler_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PUBLISH SIDE
    // =========================================================================

    /// Events acknowledged by the broker on publish
    pub static ref BUS_MESSAGES_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("bus_messages_published_total", "Events published and confirmed by the broker"),
        &["topic"]
    ).expect("metric creation failed");

    /// Publishes rejected or unconfirmed by the broker
    pub static ref BUS_PUBLISH_FAILURES: CounterVec = CounterVec::new(
        Opts::new("bus_publish_failures_total", "Publishes that failed"),
        &["topic"]
    ).expect("metric creation failed");

    // =========================================================================
    // CONSUME SIDE
    // =========================================================================

    /// Messages fetched from durable consumers
    pub static ref BUS_MESSAGES_DELIVERED: CounterVec = CounterVec::new(
        Opts::new("bus_messages_delivered_total", "Messages fetched by pollers"),
        &["topic"]
    ).expect("metric creation failed");

    /// Messages handled successfully and acknowledged
    pub static ref BUS_MESSAGES_ACKED: CounterVec = CounterVec::new(
        Opts::new("bus_messages_acked_total", "Messages acknowledged after successful handling"),
        &["topic"]
    ).expect("metric creation failed");

    /// Messages negatively acknowledged for redelivery
    pub static ref BUS_MESSAGES_NACKED: CounterVec = CounterVec::new(
        Opts::new("bus_messages_nacked_total", "Messages negatively acknowledged"),
        &["topic", "reason"]  // reason: decode/handler/panic
    ).expect("metric creation failed");

    /// Messages acknowledged without a registered handler (dropped)
    pub static ref BUS_MESSAGES_UNHANDLED: CounterVec = CounterVec::new(
        Opts::new("bus_messages_unhandled_total", "Messages dropped because no handler was registered"),
        &["topic"]
    ).expect("metric creation failed");

    /// Ack/nak round trips that failed
    pub static ref BUS_SETTLE_FAILURES: CounterVec = CounterVec::new(
        Opts::new("bus_settle_failures_total", "Failed acknowledgement round trips"),
        &["topic", "kind"]  // kind: ack/nak
    ).expect("metric creation failed");

    /// Fetch attempts that failed for reasons other than timeout
    pub static ref BUS_FETCH_ERRORS: CounterVec = CounterVec::new(
        Opts::new("bus_fetch_errors_total", "Pull fetches that failed"),
        &["topic"]
    ).expect("metric creation failed");

    /// Handler execution time
    pub static ref BUS_HANDLER_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "bus_handler_duration_seconds",
            "Time spent inside subscriber handlers"
        ).buckets(exponential_buckets(0.0005, 2.0, 14).expect("valid buckets")),
        &["topic"]
    ).expect("metric creation failed");

    /// Live pull subscriptions across all clients in the process
    pub static ref BUS_ACTIVE_SUBSCRIPTIONS: Gauge = Gauge::new(
        "bus_active_subscriptions",
        "Number of active pull subscriptions"
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Calling it more than once is harmless.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BUS_MESSAGES_PUBLISHED.clone()),
        Box::new(BUS_PUBLISH_FAILURES.clone()),
        Box::new(BUS_MESSAGES_DELIVERED.clone()),
        Box::new(BUS_MESSAGES_ACKED.clone()),
        Box::new(BUS_MESSAGES_NACKED.clone()),
        Box::new(BUS_MESSAGES_UNHANDLED.clone()),
        Box::new(BUS_SETTLE_FAILURES.clone()),
        Box::new(BUS_FETCH_ERRORS.clone()),
        Box::new(BUS_HANDLER_DURATION.clone()),
        Box::new(BUS_ACTIVE_SUBSCRIPTIONS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
