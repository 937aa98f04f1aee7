//! # Topics
//!
//! The three logical event streams and the payload shape bound to each.
//! Binding is static: a payload type knows its topic and event tag, so
//! publish and subscribe entry points cannot mix shapes up at runtime.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entities::{CorrelationId, Fork, MatchBundle, MatchMonitoring};
use crate::envelope::EventType;

/// A logical event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    /// Bundles of one match matched across bookmakers.
    BundleMatch,
    /// Odds snapshots of monitored matches.
    MatchMonitoring,
    /// Detected forks.
    ForkFound,
}

impl Topic {
    /// Every topic, in a stable order.
    pub const ALL: [Topic; 3] = [Topic::BundleMatch, Topic::MatchMonitoring, Topic::ForkFound];

    /// Broker subject the topic is published on.
    #[must_use]
    pub fn subject(&self) -> &'static str {
        match self {
            Self::BundleMatch => "events.bundle.match",
            Self::MatchMonitoring => "events.match.monitoring",
            Self::ForkFound => "events.fork.found",
        }
    }

    /// Event tag carried by envelopes on this topic.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::BundleMatch => EventType::MatchBundle,
            Self::MatchMonitoring => EventType::MatchMonitoring,
            Self::ForkFound => EventType::ForkFound,
        }
    }

    /// Resolve a broker subject back to its topic.
    #[must_use]
    pub fn from_subject(subject: &str) -> Option<Topic> {
        Self::ALL.into_iter().find(|t| t.subject() == subject)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject())
    }
}

/// A payload with a fixed topic.
pub trait TopicPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Topic this payload is published on.
    const TOPIC: Topic;

    /// Correlation identifier carried by the payload itself.
    fn correlation_id(&self) -> CorrelationId;
}

impl TopicPayload for MatchBundle {
    const TOPIC: Topic = Topic::BundleMatch;

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl TopicPayload for MatchMonitoring {
    const TOPIC: Topic = Topic::MatchMonitoring;

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl TopicPayload for Fork {
    const TOPIC: Topic = Topic::ForkFound;

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}
