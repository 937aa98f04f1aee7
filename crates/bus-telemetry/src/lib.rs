//! # Bus Telemetry
//!
//! Observability for the odds event bus.
//!
//! ## Components
//!
//! - **Logging**: global `tracing` subscriber with env-driven filtering and
//!   plain or JSON output
//! - **Metrics**: Prometheus counters for publish, delivery and settlement
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_telemetry(&config).expect("Failed to init telemetry");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUS_SERVICE_NAME` | `odds-bus` | Service name in logs |
//! | `BUS_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `BUS_JSON_LOGS` | `false` | JSON output (default `true` in containers) |
//! | `BUS_LOG_SOURCE` | `false` | Include file and line |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, BUS_ACTIVE_SUBSCRIPTIONS, BUS_FETCH_ERRORS,
    BUS_HANDLER_DURATION, BUS_MESSAGES_ACKED, BUS_MESSAGES_DELIVERED, BUS_MESSAGES_NACKED,
    BUS_MESSAGES_PUBLISHED, BUS_MESSAGES_UNHANDLED, BUS_PUBLISH_FAILURES, BUS_SETTLE_FAILURES,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

/// Convenience macro for recording a metric with a value.
#[macro_export]
macro_rules! metric_observe {
    ($metric:expr, $value:expr) => {
        $metric.observe($value)
    };
    ($metric:expr, $labels:expr, $value:expr) => {
        $metric.with_label_values($labels).observe($value)
    };
}
