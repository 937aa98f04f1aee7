//! # Test Fixtures
//!
//! Fast-polling configurations, realistic pipeline payloads and handlers
//! that record what they receive.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use shared_bus::{BusConfig, EventHandler};
use shared_types::{
    Bet, Bookmaker, BookmakerBundle, CorrelationId, Envelope, Fork, MarketType, MatchBundle,
    MatchMonitoring, SportType,
};

/// Default config with short waits so tests settle in milliseconds.
pub fn fast_config(consumer_name: &str) -> BusConfig {
    BusConfig {
        service_name: "bus-tests".to_string(),
        consumer_name: consumer_name.to_string(),
        fetch_max_wait: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
        shutdown_timeout: Duration::from_secs(2),
        ..BusConfig::default()
    }
}

pub fn bookmaker_bundle() -> BookmakerBundle {
    Bookmaker::ALL
        .iter()
        .map(|bookmaker| (*bookmaker, format!("https://odds.test/{bookmaker:?}/match/77")))
        .collect()
}

pub fn match_bundle(correlation_id: CorrelationId) -> MatchBundle {
    MatchBundle {
        correlation_id,
        team_names: vec!["Natus Vincere".to_string(), "Team Spirit".to_string()],
        bookmaker_bundle: bookmaker_bundle(),
    }
}

pub fn monitoring(correlation_id: CorrelationId) -> MatchMonitoring {
    let bets: HashMap<Bookmaker, Bet> = [
        (Bookmaker::Fonbet, 1.85, 1.95),
        (Bookmaker::Winline, 1.80, 2.05),
        (Bookmaker::BetBoom, 1.90, 1.90),
    ]
    .into_iter()
    .map(|(bookmaker, less, more)| {
        (
            bookmaker,
            Bet {
                bet_market: MarketType::MatchWinner,
                less,
                more,
            },
        )
    })
    .collect();

    MatchMonitoring {
        correlation_id,
        sport_type: SportType::CounterStrike,
        team_names: vec!["Natus Vincere".to_string(), "Team Spirit".to_string()],
        bookmaker_bundle: bookmaker_bundle(),
        bets,
        timestamp: Utc::now(),
    }
}

pub fn fork(correlation_id: CorrelationId) -> Fork {
    Fork {
        correlation_id,
        team_names: vec!["Natus Vincere".to_string(), "Team Spirit".to_string()],
        bookmaker_bundle: bookmaker_bundle(),
        timestamp: Utc::now(),
    }
}

/// Records every envelope it handles. Fails the first `failures` calls.
pub struct Recorder<P> {
    seen: Mutex<Vec<Envelope<P>>>,
    calls: AtomicUsize,
    failures: usize,
}

impl<P> Recorder<P> {
    pub fn new() -> Self {
        Self::failing(0)
    }

    /// Fails `failures` times before succeeding.
    pub fn failing(failures: usize) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            failures,
        }
    }

    /// Never succeeds.
    pub fn rejecting() -> Self {
        Self::failing(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<P: Clone> Recorder<P> {
    pub fn seen(&self) -> Vec<Envelope<P>> {
        self.seen.lock().clone()
    }
}

impl<P> Default for Recorder<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: Send + 'static> EventHandler<P> for Recorder<P> {
    async fn handle(&self, event: Envelope<P>) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(event);
        if call < self.failures {
            anyhow::bail!("rejected delivery {}", call + 1);
        }
        Ok(())
    }
}

/// Poll `check` until it holds or `limit` elapses. Returns the final result.
pub async fn wait_until(limit: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Await `future`, panicking if it outlives `limit`.
pub async fn within<F: Future>(limit: Duration, future: F) -> F::Output {
    match tokio::time::timeout(limit, future).await {
        Ok(output) => output,
        Err(_) => panic!("operation did not finish within {limit:?}"),
    }
}
