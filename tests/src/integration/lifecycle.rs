//! # Client Lifecycle
//!
//! Shutdown and durability scenarios:
//!
//! - `close` is idempotent and bounded, even with a handler that never returns
//! - A durable consumer keeps messages published while its client is away
//! - A message left unsettled by a stopped client is redelivered after
//!   `ack_wait`
//! - Losing the broker connection surfaces as publish failures, and delivery
//!   resumes once it returns

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use shared_bus::{
        BusConfig, BusError, EventBusClient, EventHandler, InMemoryBroker, Lifecycle,
    };
    use shared_types::{Fork, ForkFoundEvent, MatchBundle, Topic};

    use crate::fixtures::{fast_config, fork, match_bundle, wait_until, within, Recorder};

    const SETTLE: Duration = Duration::from_secs(5);

    /// Accepts a delivery and then never finishes handling it.
    struct Stalled;

    #[async_trait::async_trait]
    impl EventHandler<Fork> for Stalled {
        async fn handle(&self, _event: ForkFoundEvent) -> anyhow::Result<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    // =========================================================================
    // CLOSE
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_double_close_succeeds_both_times() {
        let broker = InMemoryBroker::new();
        let client = EventBusClient::connect(fast_config("double-close"), &broker)
            .await
            .unwrap();
        client
            .subscribe_match_bundle(Arc::new(Recorder::<MatchBundle>::new()))
            .await
            .unwrap();

        client.close().await.unwrap();
        client.close().await.unwrap();

        let report = client.diagnostics().await;
        assert_eq!(report.state, Lifecycle::Closed);
        assert!(!report.is_connected);
        assert_eq!(report.subscriptions, 0);
        assert_eq!(report.handlers, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscribe_then_immediate_close_is_bounded() {
        let broker = InMemoryBroker::new();
        let config = fast_config("immediate-close");
        let limit = config.shutdown_timeout + Duration::from_secs(1);
        let client = EventBusClient::connect(config, &broker).await.unwrap();

        client
            .subscribe_fork_found(Arc::new(Recorder::<Fork>::new()))
            .await
            .unwrap();
        client
            .subscribe_match_bundle(Arc::new(Recorder::<MatchBundle>::new()))
            .await
            .unwrap();

        within(limit, client.close()).await.unwrap();
        assert_eq!(client.state().await, Lifecycle::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_gives_up_on_stalled_handler() {
        let broker = InMemoryBroker::new();
        let config = BusConfig {
            shutdown_timeout: Duration::from_millis(200),
            ..fast_config("stalled")
        };
        let client = EventBusClient::connect(config, &broker).await.unwrap();
        client.subscribe_fork_found(Stalled).await.unwrap();
        client.publish_fork_found(fork(1)).await.unwrap();

        assert!(
            wait_until(SETTLE, || client.metrics().snapshot().delivered == 1).await
        );

        let started = Instant::now();
        within(Duration::from_secs(2), client.close()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(client.state().await, Lifecycle::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_operations_after_close_fail_fast() {
        let broker = InMemoryBroker::new();
        let client = EventBusClient::connect(fast_config("after-close"), &broker)
            .await
            .unwrap();
        client.close().await.unwrap();

        assert!(matches!(
            client.publish_match_bundle(match_bundle(1)).await,
            Err(BusError::ClientClosed)
        ));
        assert!(matches!(
            client
                .subscribe_fork_found(Arc::new(Recorder::<Fork>::new()))
                .await,
            Err(BusError::ClientClosed)
        ));
        assert!(!client.unsubscribe(Topic::ForkFound).await.unwrap());
    }

    // =========================================================================
    // DURABILITY
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_durable_consumer_resumes_after_restart() {
        let broker = InMemoryBroker::new();

        let first = EventBusClient::connect(fast_config("resume"), &broker)
            .await
            .unwrap();
        first
            .subscribe_fork_found(Arc::new(Recorder::<Fork>::new()))
            .await
            .unwrap();
        first.close().await.unwrap();

        // Published while no poller is running.
        let producer = EventBusClient::connect(fast_config("producer"), &broker)
            .await
            .unwrap();
        for correlation_id in [21, 22] {
            producer.publish_fork_found(fork(correlation_id)).await.unwrap();
        }

        let second = EventBusClient::connect(fast_config("resume"), &broker)
            .await
            .unwrap();
        let forks = Arc::new(Recorder::<Fork>::new());
        second.subscribe_fork_found(forks.clone()).await.unwrap();

        assert!(wait_until(SETTLE, || forks.calls() == 2).await);
        let ids: Vec<_> = forks.seen().iter().map(|e| e.correlation_id()).collect();
        assert_eq!(ids, vec![21, 22]);

        second.close().await.unwrap();
        producer.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsettled_message_redelivered_after_ack_wait() {
        let broker = InMemoryBroker::new();
        let config = || BusConfig {
            ack_wait: Duration::from_millis(300),
            shutdown_timeout: Duration::from_millis(50),
            ..fast_config("abandoned")
        };

        let first = EventBusClient::connect(config(), &broker).await.unwrap();
        first.subscribe_fork_found(Stalled).await.unwrap();
        first.publish_fork_found(fork(5)).await.unwrap();
        assert!(wait_until(SETTLE, || first.metrics().snapshot().delivered == 1).await);
        first.close().await.unwrap();

        let second = EventBusClient::connect(config(), &broker).await.unwrap();
        let forks = Arc::new(Recorder::<Fork>::new());
        second.subscribe_fork_found(forks.clone()).await.unwrap();

        assert!(wait_until(SETTLE, || forks.calls() == 1).await);
        assert_eq!(forks.seen()[0].correlation_id(), 5);

        second.close().await.unwrap();
    }

    // =========================================================================
    // CONNECTION LOSS
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delivery_resumes_after_reconnect() {
        let broker = InMemoryBroker::new();
        let client = EventBusClient::connect(fast_config("flaky"), &broker)
            .await
            .unwrap();
        let forks = Arc::new(Recorder::<Fork>::new());
        client.subscribe_fork_found(forks.clone()).await.unwrap();

        broker.disconnect();
        assert!(!client.is_connected().await);
        assert!(matches!(
            client.publish_fork_found(fork(1)).await,
            Err(BusError::PublishFailure {
                topic: Topic::ForkFound,
                ..
            })
        ));
        assert!(wait_until(SETTLE, || client.metrics().snapshot().fetch_errors > 0).await);

        broker.reconnect();
        assert!(client.is_connected().await);
        client.publish_fork_found(fork(2)).await.unwrap();

        assert!(wait_until(SETTLE, || forks.calls() == 1).await);
        assert_eq!(forks.seen()[0].correlation_id(), 2);
        assert_eq!(client.metrics().snapshot().publish_failures, 1);

        client.close().await.unwrap();
    }
}
