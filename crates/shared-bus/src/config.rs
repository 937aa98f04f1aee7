//! # Bus Configuration
//!
//! One immutable value built at startup and shared by every component of a
//! client. Defaults match the values the pipeline has always run with.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use shared_types::Topic;
use thiserror::Error;
use tracing::warn;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Settings for one event-bus client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    // =========================================================================
    // CONNECTION
    // =========================================================================
    /// Broker URL.
    pub url: String,
    /// Publishing service name stamped into every envelope.
    pub service_name: String,
    /// Upper bound for establishing the initial connection.
    pub connect_timeout: Duration,
    /// Upper bound for broker request/response round trips.
    pub request_timeout: Duration,
    /// Delay between reconnect attempts.
    pub reconnect_wait: Duration,
    /// Reconnect attempts before giving up. `None` retries forever.
    pub max_reconnects: Option<usize>,

    // =========================================================================
    // STREAM
    // =========================================================================
    /// Stream holding all three topics.
    pub stream_name: String,
    /// Create the stream on connect if it is missing.
    pub ensure_stream: bool,
    /// Retention of stored messages.
    pub max_message_age: Duration,
    /// Stream replicas.
    pub replicas: usize,

    // =========================================================================
    // SUBSCRIPTION
    // =========================================================================
    /// Base durable consumer name; each topic derives its own durable from it.
    pub consumer_name: String,
    /// Logical group label for logs. Clients sharing `consumer_name` already
    /// share work through the same durables.
    pub consumer_group: String,
    /// Time the broker waits for an ack before redelivering.
    pub ack_wait: Duration,
    /// Maximum delivery attempts per message.
    pub max_deliver: i64,
    /// Maximum unacknowledged messages outstanding per consumer.
    pub max_ack_pending: i64,
    /// Messages requested per fetch.
    pub pull_batch_size: usize,
    /// Upper bound a single fetch waits for messages.
    pub fetch_max_wait: Duration,
    /// Pacing between fetch attempts.
    pub poll_interval: Duration,
    /// Upper bound `close` waits for pollers to exit.
    pub shutdown_timeout: Duration,

    // =========================================================================
    // PROTOCOL
    // =========================================================================
    /// Envelope protocol version.
    pub protocol_version: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            service_name: "odds-bus".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            reconnect_wait: Duration::from_secs(1),
            max_reconnects: None,

            stream_name: "EVENTS".to_string(),
            ensure_stream: true,
            max_message_age: Duration::from_secs(24 * 60 * 60),
            replicas: 1,

            consumer_name: "odds-bus".to_string(),
            consumer_group: "odds-bus".to_string(),
            ack_wait: Duration::from_secs(30),
            max_deliver: 5,
            max_ack_pending: 256,
            pull_batch_size: 100,
            fetch_max_wait: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(10),

            protocol_version: "1.0.0".to_string(),
        }
    }
}

impl BusConfig {
    /// Defaults overridden by `BUS_*` environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_URL`, `BUS_SERVICE_NAME`, `BUS_STREAM`, `BUS_CONSUMER`,
    ///   `BUS_CONSUMER_GROUP`, `BUS_PROTOCOL_VERSION`: strings
    /// - `BUS_ACK_WAIT_MS`, `BUS_FETCH_MAX_WAIT_MS`, `BUS_POLL_INTERVAL_MS`,
    ///   `BUS_CONNECT_TIMEOUT_MS`, `BUS_RECONNECT_WAIT_MS`,
    ///   `BUS_SHUTDOWN_TIMEOUT_MS`: milliseconds
    /// - `BUS_MAX_DELIVER`, `BUS_MAX_ACK_PENDING`, `BUS_PULL_BATCH_SIZE`: counts
    /// - `BUS_MAX_RECONNECTS`: count, negative for unlimited
    /// - `BUS_ENSURE_STREAM`: `true`/`false`
    ///
    /// Values that fail to parse keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("BUS_URL") {
            config.url = v;
        }
        if let Ok(v) = env::var("BUS_SERVICE_NAME") {
            config.service_name = v;
        }
        if let Ok(v) = env::var("BUS_STREAM") {
            config.stream_name = v;
        }
        if let Ok(v) = env::var("BUS_CONSUMER") {
            config.consumer_name = v;
        }
        if let Ok(v) = env::var("BUS_CONSUMER_GROUP") {
            config.consumer_group = v;
        }
        if let Ok(v) = env::var("BUS_PROTOCOL_VERSION") {
            config.protocol_version = v;
        }

        override_millis("BUS_ACK_WAIT_MS", &mut config.ack_wait);
        override_millis("BUS_FETCH_MAX_WAIT_MS", &mut config.fetch_max_wait);
        override_millis("BUS_POLL_INTERVAL_MS", &mut config.poll_interval);
        override_millis("BUS_CONNECT_TIMEOUT_MS", &mut config.connect_timeout);
        override_millis("BUS_RECONNECT_WAIT_MS", &mut config.reconnect_wait);
        override_millis("BUS_SHUTDOWN_TIMEOUT_MS", &mut config.shutdown_timeout);

        override_parsed("BUS_MAX_DELIVER", &mut config.max_deliver);
        override_parsed("BUS_MAX_ACK_PENDING", &mut config.max_ack_pending);
        override_parsed("BUS_PULL_BATCH_SIZE", &mut config.pull_batch_size);
        override_parsed("BUS_ENSURE_STREAM", &mut config.ensure_stream);

        let mut max_reconnects: i64 = -1;
        if override_parsed("BUS_MAX_RECONNECTS", &mut max_reconnects) {
            config.max_reconnects = usize::try_from(max_reconnects).ok();
        }

        config
    }

    /// Check the configuration before any broker is contacted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("url", &self.url),
            ("service_name", &self.service_name),
            ("stream_name", &self.stream_name),
            ("consumer_name", &self.consumer_name),
            ("protocol_version", &self.protocol_version),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty { field });
            }
        }

        if self.pull_batch_size == 0 {
            return Err(ConfigError::Zero { field: "pull_batch_size" });
        }
        if self.max_deliver <= 0 {
            return Err(ConfigError::Zero { field: "max_deliver" });
        }
        if self.max_ack_pending <= 0 {
            return Err(ConfigError::Zero { field: "max_ack_pending" });
        }
        if self.ack_wait.is_zero() {
            return Err(ConfigError::Zero { field: "ack_wait" });
        }
        if self.fetch_max_wait.is_zero() {
            return Err(ConfigError::Zero { field: "fetch_max_wait" });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero { field: "poll_interval" });
        }

        Ok(())
    }

    /// Durable consumer name for one topic.
    ///
    /// A durable binds a single subject filter, so every topic gets its own.
    #[must_use]
    pub fn durable_name(&self, topic: Topic) -> String {
        format!("{}_{}", self.consumer_name, topic.subject().replace('.', "_"))
    }

    /// Subjects bound to the stream.
    #[must_use]
    pub fn stream_subjects(&self) -> Vec<String> {
        Topic::ALL.iter().map(|t| t.subject().to_string()).collect()
    }
}

fn override_millis(key: &str, target: &mut Duration) {
    let mut millis: u64 = 0;
    if override_parsed(key, &mut millis) {
        *target = Duration::from_millis(millis);
    }
}

fn override_parsed<T: FromStr>(key: &str, target: &mut T) -> bool {
    let Ok(raw) = env::var(key) else {
        return false;
    };
    match raw.trim().parse() {
        Ok(value) => {
            *target = value;
            true
        }
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable configuration value");
            false
        }
    }
}
