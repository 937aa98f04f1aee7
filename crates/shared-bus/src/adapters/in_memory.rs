//! # In-Memory Broker
//!
//! Single-process broker with JetStream delivery semantics. Used by tests,
//! local runs and the runtime binary when no NATS server is configured.
//!
//! ## Semantics
//!
//! | Feature | Behaviour |
//! |---------|-----------|
//! | Streams | Subject list (`*`/`>` wildcards), monotonically increasing sequence |
//! | Durable consumer | Starts after the last stored message (deliver-new) |
//! | Ack | Removes the message from the consumer's pending set |
//! | Nak | Immediate redelivery unless `max_deliver` is reached |
//! | Ack wait | Unacknowledged messages are redelivered after `ack_wait` |
//! | Max ack pending | Caps outstanding unacknowledged messages per consumer |
//! | Fetch | Wakes as soon as messages are available, else after `max_wait` |
//!
//! ## Fault Injection
//!
//! `fail_connect`, `set_connect_delay`, `fail_next_publishes`,
//! `fail_unsubscribe`, `fail_settlements`, `disconnect` / `reconnect`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{BrokerError, FetchError};
use crate::ports::outbound::{
    Broker, ConnectOptions, Connector, ConsumerSpec, Delivery, PublishAck, PullSubscription,
    StreamSpec, StreamStats,
};

/// Shared broker state. Clones observe the same streams.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    online: AtomicBool,
    /// Bumped on every change a pending fetch may care about.
    changed: watch::Sender<u64>,
}

impl Default for Shared {
    fn default() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            faults: Mutex::new(Faults::default()),
            online: AtomicBool::new(true),
            changed,
        }
    }
}

impl Shared {
    fn notify(&self) {
        self.changed.send_modify(|version| *version = version.wrapping_add(1));
    }
}

#[derive(Default)]
struct Faults {
    fail_connect: bool,
    connect_delay: Duration,
    failing_publishes: usize,
    fail_unsubscribe: bool,
    fail_settlements: bool,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamState>,
    consumers: HashMap<(String, String), ConsumerState>,
}

struct StreamState {
    spec: StreamSpec,
    messages: BTreeMap<u64, StoredMessage>,
    last_seq: u64,
    bytes: u64,
}

struct StoredMessage {
    subject: String,
    payload: Arc<[u8]>,
}

impl StoredMessage {
    fn ready(&self, seq: u64, delivered: u64) -> Ready {
        Ready {
            seq,
            subject: self.subject.clone(),
            payload: self.payload.clone(),
            delivered,
        }
    }
}

struct ConsumerState {
    spec: ConsumerSpec,
    /// Next stream sequence never delivered to this consumer.
    next_seq: u64,
    /// Delivered but not yet acknowledged. `deadline == None` means the
    /// message is queued for redelivery.
    tracked: BTreeMap<u64, Tracked>,
}

struct Tracked {
    deliveries: u64,
    deadline: Option<Instant>,
}

struct Ready {
    seq: u64,
    subject: String,
    payload: Arc<[u8]>,
    delivered: u64,
}

impl ConsumerState {
    fn max_deliver(&self) -> u64 {
        u64::try_from(self.spec.max_deliver).unwrap_or(1).max(1)
    }

    fn max_ack_pending(&self) -> usize {
        usize::try_from(self.spec.max_ack_pending).unwrap_or(1).max(1)
    }

    fn outstanding(&self) -> usize {
        self.tracked.values().filter(|t| t.deadline.is_some()).count()
    }

    /// Requeue messages whose ack wait elapsed; drop those out of attempts.
    fn expire(&mut self, now: Instant) {
        let max_deliver = self.max_deliver();
        self.tracked.retain(|_, tracked| match tracked.deadline {
            Some(deadline) if deadline <= now => {
                tracked.deadline = None;
                tracked.deliveries < max_deliver
            }
            _ => true,
        });
    }

    /// Take up to `batch` messages: redeliveries first, then new messages.
    fn collect(&mut self, stream: &StreamState, batch: usize, now: Instant) -> Vec<Ready> {
        self.expire(now);

        let limit = self.max_ack_pending();
        let ack_deadline = now + self.spec.ack_wait;
        let mut outstanding = self.outstanding();
        let mut ready = Vec::new();

        let queued: Vec<u64> = self
            .tracked
            .iter()
            .filter(|(_, t)| t.deadline.is_none())
            .map(|(seq, _)| *seq)
            .collect();

        for seq in queued {
            if ready.len() >= batch || outstanding >= limit {
                return ready;
            }
            let Some(message) = stream.messages.get(&seq) else {
                self.tracked.remove(&seq);
                continue;
            };
            if let Some(tracked) = self.tracked.get_mut(&seq) {
                tracked.deliveries += 1;
                tracked.deadline = Some(ack_deadline);
                outstanding += 1;
                ready.push(message.ready(seq, tracked.deliveries));
            }
        }

        while ready.len() < batch && outstanding < limit {
            let next = stream
                .messages
                .range(self.next_seq..)
                .find(|(_, m)| subject_matches(&self.spec.filter_subject, &m.subject));

            let Some((seq, message)) = next else {
                self.next_seq = stream.last_seq + 1;
                break;
            };

            let seq = *seq;
            self.next_seq = seq + 1;
            self.tracked.insert(
                seq,
                Tracked {
                    deliveries: 1,
                    deadline: Some(ack_deadline),
                },
            );
            outstanding += 1;
            ready.push(message.ready(seq, 1));
        }

        ready
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.tracked.values().filter_map(|t| t.deadline).min()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // FAULT INJECTION
    // =========================================================================

    /// Refuse new connections.
    pub fn fail_connect(&self, fail: bool) {
        self.shared.faults.lock().fail_connect = fail;
    }

    /// Delay every connection attempt.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.shared.faults.lock().connect_delay = delay;
    }

    /// Reject the next `count` publishes.
    pub fn fail_next_publishes(&self, count: usize) {
        self.shared.faults.lock().failing_publishes = count;
    }

    /// Make subscription cancellation fail.
    pub fn fail_unsubscribe(&self, fail: bool) {
        self.shared.faults.lock().fail_unsubscribe = fail;
    }

    /// Make ack and nak round trips fail.
    pub fn fail_settlements(&self, fail: bool) {
        self.shared.faults.lock().fail_settlements = fail;
    }

    /// Drop every connection until `reconnect`.
    pub fn disconnect(&self) {
        self.shared.online.store(false, Ordering::SeqCst);
        self.shared.notify();
    }

    pub fn reconnect(&self) {
        self.shared.online.store(true, Ordering::SeqCst);
        self.shared.notify();
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    #[must_use]
    pub fn stream_stats(&self, stream: &str) -> Option<StreamStats> {
        self.shared.state.lock().streams.get(stream).map(|s| StreamStats {
            messages: s.messages.len() as u64,
            bytes: s.bytes,
        })
    }

    /// Delivered but unacknowledged messages of a consumer, `None` if the
    /// durable does not exist.
    #[must_use]
    pub fn ack_pending(&self, stream: &str, durable: &str) -> Option<usize> {
        self.shared
            .state
            .lock()
            .consumers
            .get(&(stream.to_string(), durable.to_string()))
            .map(|c| c.tracked.len())
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn Broker>, BrokerError> {
        let (delay, fail) = {
            let faults = self.shared.faults.lock();
            (faults.connect_delay, faults.fail_connect)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail || !self.shared.online.load(Ordering::SeqCst) {
            return Err(BrokerError::Connect(format!(
                "{} refused the connection",
                options.url
            )));
        }

        debug!(url = %options.url, name = %options.name, "In-memory broker connection opened");
        Ok(Arc::new(InMemoryConnection {
            shared: self.shared.clone(),
            link: Arc::new(Link::default()),
            url: options.url.clone(),
        }))
    }
}

/// Per-connection flag shared with its subscriptions and deliveries.
#[derive(Default)]
struct Link {
    closed: AtomicBool,
}

fn check_link(shared: &Shared, link: &Link) -> Result<(), BrokerError> {
    if link.closed.load(Ordering::SeqCst) || !shared.online.load(Ordering::SeqCst) {
        return Err(BrokerError::Disconnected);
    }
    Ok(())
}

/// One client connection to an `InMemoryBroker`.
pub struct InMemoryConnection {
    shared: Arc<Shared>,
    link: Arc<Link>,
    url: String,
}

#[async_trait]
impl Broker for InMemoryConnection {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BrokerError> {
        check_link(&self.shared, &self.link)?;
        let mut state = self.shared.state.lock();
        if state.streams.contains_key(&spec.name) {
            return Ok(());
        }
        state.streams.insert(
            spec.name.clone(),
            StreamState {
                spec: spec.clone(),
                messages: BTreeMap::new(),
                last_seq: 0,
                bytes: 0,
            },
        );
        debug!(stream = %spec.name, subjects = ?spec.subjects, "Stream created");
        Ok(())
    }

    async fn ensure_consumer(&self, spec: &ConsumerSpec) -> Result<(), BrokerError> {
        check_link(&self.shared, &self.link)?;
        let mut state = self.shared.state.lock();
        let Some(stream) = state.streams.get(&spec.stream) else {
            return Err(BrokerError::StreamNotFound(spec.stream.clone()));
        };
        let next_seq = stream.last_seq + 1;

        let key = (spec.stream.clone(), spec.durable.clone());
        if state.consumers.contains_key(&key) {
            return Err(BrokerError::ConsumerAlreadyExists(spec.durable.clone()));
        }
        state.consumers.insert(
            key,
            ConsumerState {
                spec: spec.clone(),
                next_seq,
                tracked: BTreeMap::new(),
            },
        );
        debug!(stream = %spec.stream, consumer = %spec.durable, "Consumer created");
        Ok(())
    }

    async fn bind_pull(
        &self,
        stream: &str,
        durable: &str,
        subject: &str,
    ) -> Result<Arc<dyn PullSubscription>, BrokerError> {
        check_link(&self.shared, &self.link)?;
        let state = self.shared.state.lock();
        let key = (stream.to_string(), durable.to_string());
        let consumer = state
            .consumers
            .get(&key)
            .ok_or_else(|| BrokerError::ConsumerNotFound(durable.to_string()))?;
        if consumer.spec.filter_subject != subject {
            return Err(BrokerError::Request(format!(
                "consumer {durable} filters {}, not {subject}",
                consumer.spec.filter_subject
            )));
        }

        Ok(Arc::new(InMemorySubscription {
            shared: self.shared.clone(),
            link: self.link.clone(),
            key,
            subject: subject.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, BrokerError> {
        check_link(&self.shared, &self.link)?;
        {
            let mut faults = self.shared.faults.lock();
            if faults.failing_publishes > 0 {
                faults.failing_publishes -= 1;
                return Err(BrokerError::Request("publish rejected".to_string()));
            }
        }

        let ack = {
            let mut state = self.shared.state.lock();
            let stream = state
                .streams
                .values_mut()
                .find(|s| s.spec.subjects.iter().any(|f| subject_matches(f, subject)))
                .ok_or_else(|| BrokerError::NoStreamForSubject(subject.to_string()))?;

            stream.last_seq += 1;
            stream.bytes += payload.len() as u64;
            stream.messages.insert(
                stream.last_seq,
                StoredMessage {
                    subject: subject.to_string(),
                    payload: Arc::from(payload),
                },
            );
            PublishAck {
                stream: stream.spec.name.clone(),
                sequence: stream.last_seq,
            }
        };

        trace!(subject, stream = %ack.stream, sequence = ack.sequence, "Message stored");
        self.shared.notify();
        Ok(ack)
    }

    async fn stream_info(&self, stream: &str) -> Result<StreamStats, BrokerError> {
        check_link(&self.shared, &self.link)?;
        let state = self.shared.state.lock();
        let stream_state = state
            .streams
            .get(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        Ok(StreamStats {
            messages: stream_state.messages.len() as u64,
            bytes: stream_state.bytes,
        })
    }

    fn is_connected(&self) -> bool {
        check_link(&self.shared, &self.link).is_ok()
    }

    fn connected_url(&self) -> String {
        self.url.clone()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.link.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Disconnected);
        }
        self.shared.notify();
        debug!(url = %self.url, "In-memory broker connection closed");
        Ok(())
    }
}

/// Pull subscription bound to one durable consumer.
pub struct InMemorySubscription {
    shared: Arc<Shared>,
    link: Arc<Link>,
    key: (String, String),
    subject: String,
    closed: AtomicBool,
}

impl InMemorySubscription {
    fn try_collect(&self, batch: usize) -> Result<(Vec<Ready>, Option<Instant>), FetchError> {
        if self.closed.load(Ordering::SeqCst) || self.link.closed.load(Ordering::SeqCst) {
            return Err(FetchError::Closed);
        }
        check_link(&self.shared, &self.link)?;

        let mut guard = self.shared.state.lock();
        let State { streams, consumers } = &mut *guard;
        let stream = streams
            .get(&self.key.0)
            .ok_or_else(|| BrokerError::StreamNotFound(self.key.0.clone()))?;
        let consumer = consumers
            .get_mut(&self.key)
            .ok_or_else(|| BrokerError::ConsumerNotFound(self.key.1.clone()))?;

        let ready = consumer.collect(stream, batch, Instant::now());
        Ok((ready, consumer.next_deadline()))
    }
}

#[async_trait]
impl PullSubscription for InMemorySubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn fetch(
        &self,
        batch: usize,
        max_wait: Duration,
    ) -> Result<Vec<Box<dyn Delivery>>, FetchError> {
        let expires = Instant::now() + max_wait;
        let mut changes = self.shared.changed.subscribe();

        loop {
            let (ready, next_deadline) = self.try_collect(batch)?;
            if !ready.is_empty() {
                return Ok(ready
                    .into_iter()
                    .map(|r| {
                        Box::new(InMemoryDelivery {
                            shared: self.shared.clone(),
                            link: self.link.clone(),
                            key: self.key.clone(),
                            seq: r.seq,
                            subject: r.subject,
                            payload: r.payload,
                            delivered: r.delivered,
                            settled: AtomicBool::new(false),
                        }) as Box<dyn Delivery>
                    })
                    .collect());
            }

            if Instant::now() >= expires {
                return Err(FetchError::Timeout);
            }
            let wake = next_deadline.map_or(expires, |d| d.min(expires));

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(FetchError::Closed);
                    }
                }
                () = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn unsubscribe(&self) -> Result<(), BrokerError> {
        if self.shared.faults.lock().fail_unsubscribe {
            return Err(BrokerError::Request("unsubscribe rejected".to_string()));
        }
        self.closed.store(true, Ordering::SeqCst);
        self.shared.notify();
        Ok(())
    }
}

/// A message handed out by `InMemorySubscription::fetch`.
pub struct InMemoryDelivery {
    shared: Arc<Shared>,
    link: Arc<Link>,
    key: (String, String),
    seq: u64,
    subject: String,
    payload: Arc<[u8]>,
    delivered: u64,
    settled: AtomicBool,
}

impl InMemoryDelivery {
    fn settle(&self, redeliver: bool) -> Result<(), BrokerError> {
        check_link(&self.shared, &self.link)?;
        if self.shared.faults.lock().fail_settlements {
            return Err(BrokerError::Request("settlement rejected".to_string()));
        }
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadySettled);
        }

        {
            let mut state = self.shared.state.lock();
            let consumer = state
                .consumers
                .get_mut(&self.key)
                .ok_or_else(|| BrokerError::ConsumerNotFound(self.key.1.clone()))?;
            let max_deliver = consumer.max_deliver();

            // A redelivery supersedes this copy of the message.
            match consumer.tracked.get_mut(&self.seq) {
                Some(tracked) if tracked.deadline.is_some() && tracked.deliveries == self.delivered => {
                    if redeliver && tracked.deliveries < max_deliver {
                        tracked.deadline = None;
                    } else {
                        consumer.tracked.remove(&self.seq);
                    }
                }
                _ => return Err(BrokerError::AlreadySettled),
            }
        }

        self.shared.notify();
        Ok(())
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
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
        self.seq
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle(false)
    }

    async fn nak(&self) -> Result<(), BrokerError> {
        self.settle(true)
    }
}

/// NATS subject matching with `*` (one token) and `>` (rest) wildcards.
fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
