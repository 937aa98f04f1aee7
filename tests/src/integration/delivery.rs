//! # Delivery Guarantees
//!
//! At-least-once delivery through a real client and poller:
//!
//! 1. A handled message is delivered once and acknowledged
//! 2. A failing handler sees redeliveries up to `max_deliver`, then stops
//! 3. A body that does not decode is naked without reaching the handler
//! 4. Batches smaller than the backlog still drain it, in order

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;
    use shared_bus::{
        Broker, BusConfig, BusError, ConnectOptions, Connector, EventBusClient, InMemoryBroker,
    };
    use shared_types::{
        encode, CorrelationId, EnvelopeBuilder, EventType, Fork, MatchBundle, MatchMonitoring,
        Topic,
    };

    use crate::fixtures::{fast_config, fork, match_bundle, monitoring, wait_until, Recorder};

    const SETTLE: Duration = Duration::from_secs(5);

    // =========================================================================
    // EXACTLY ONE INVOCATION PER MESSAGE
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_topic_delivers_structurally_equal_envelope() {
        let broker = InMemoryBroker::new();
        let client = EventBusClient::connect(fast_config("delivery"), &broker)
            .await
            .unwrap();

        let bundles = Arc::new(Recorder::<MatchBundle>::new());
        let snapshots = Arc::new(Recorder::<MatchMonitoring>::new());
        let forks = Arc::new(Recorder::<Fork>::new());
        client.subscribe_match_bundle(bundles.clone()).await.unwrap();
        client
            .subscribe_match_monitoring(snapshots.clone())
            .await
            .unwrap();
        client.subscribe_fork_found(forks.clone()).await.unwrap();

        let bundle = match_bundle(10);
        let snapshot = monitoring(10);
        let found = fork(10);
        client.publish_match_bundle(bundle.clone()).await.unwrap();
        client
            .publish_match_monitoring(snapshot.clone())
            .await
            .unwrap();
        client.publish_fork_found(found.clone()).await.unwrap();

        assert!(
            wait_until(SETTLE, || {
                bundles.calls() == 1 && snapshots.calls() == 1 && forks.calls() == 1
            })
            .await
        );
        // Nothing arrives twice.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = bundles.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload, bundle);
        assert_eq!(seen[0].event_header.event_type, EventType::MatchBundle);
        assert_eq!(seen[0].event_header.source, "bus-tests");
        assert_eq!(seen[0].event_header.version, "1.0.0");

        let seen = snapshots.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload, snapshot);
        assert_eq!(seen[0].event_header.event_type, EventType::MatchMonitoring);

        let seen = forks.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload, found);
        assert_eq!(seen[0].correlation_id(), 10);

        let metrics = client.metrics().snapshot();
        assert_eq!(metrics.published, 3);
        assert_eq!(metrics.acked, 3);
        assert_eq!(metrics.nacked, 0);

        client.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_of_two_drains_three_forks_in_order() {
        let broker = InMemoryBroker::new();
        let config = BusConfig {
            pull_batch_size: 2,
            ..fast_config("fork-batch")
        };
        let client = EventBusClient::connect(config, &broker).await.unwrap();
        assert_eq!(client.config().stream_name, "EVENTS");

        let forks = Arc::new(Recorder::<Fork>::new());
        client.subscribe_fork_found(forks.clone()).await.unwrap();

        for correlation_id in 1..=3 {
            client.publish_fork_found(fork(correlation_id)).await.unwrap();
        }

        assert!(wait_until(SETTLE, || forks.calls() == 3).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let ids: Vec<_> = forks.seen().iter().map(|e| e.correlation_id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(broker.ack_pending("EVENTS", "fork-batch_events_fork_found"), Some(0));

        client.close().await.unwrap();
    }

    // =========================================================================
    // REDELIVERY
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failing_handler_redelivered_until_max_deliver() {
        let broker = InMemoryBroker::new();
        let config = BusConfig {
            max_deliver: 3,
            ..fast_config("redelivery")
        };
        let client = EventBusClient::connect(config, &broker).await.unwrap();

        let forks = Arc::new(Recorder::<Fork>::rejecting());
        client.subscribe_fork_found(forks.clone()).await.unwrap();
        client.publish_fork_found(fork(7)).await.unwrap();

        assert!(wait_until(SETTLE, || forks.calls() == 3).await);
        // The limit is final for this consumer.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(forks.calls(), 3);

        let event_ids: Vec<_> = forks.seen().iter().map(|e| e.event_id()).collect();
        assert!(event_ids.windows(2).all(|pair| pair[0] == pair[1]));

        let metrics = client.metrics().snapshot();
        assert_eq!(metrics.nacked, 3);
        assert_eq!(metrics.handler_failures, 3);
        assert_eq!(metrics.acked, 0);

        client.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_transient_failure_recovers_on_redelivery() {
        let broker = InMemoryBroker::new();
        let client = EventBusClient::connect(fast_config("transient"), &broker)
            .await
            .unwrap();

        let bundles = Arc::new(Recorder::<MatchBundle>::failing(1));
        client.subscribe_match_bundle(bundles.clone()).await.unwrap();
        client.publish_match_bundle(match_bundle(3)).await.unwrap();

        assert!(wait_until(SETTLE, || client.metrics().snapshot().acked == 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bundles.calls(), 2);
        assert_eq!(client.metrics().snapshot().nacked, 1);

        client.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_malformed_body_is_naked_and_handler_skipped() {
        let broker = InMemoryBroker::new();
        let config = BusConfig {
            max_deliver: 2,
            ..fast_config("malformed")
        };
        let client = EventBusClient::connect(config, &broker).await.unwrap();

        let forks = Arc::new(Recorder::<Fork>::new());
        client.subscribe_fork_found(forks.clone()).await.unwrap();

        // A producer publishing the wrong shape on the fork subject.
        let builder = EnvelopeBuilder::new("rogue", "1.0.0");
        let body = encode(&builder.build(match_bundle(1), 1)).unwrap();
        let raw = broker
            .connect(&ConnectOptions::from(client.config()))
            .await
            .unwrap();
        raw.publish(Topic::ForkFound.subject(), body).await.unwrap();

        assert!(wait_until(SETTLE, || client.metrics().snapshot().decode_failures == 2).await);
        assert_eq!(forks.calls(), 0);

        client.close().await.unwrap();
        raw.close().await.unwrap();
    }

    // =========================================================================
    // CONCURRENCY
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_all_delivered() {
        let broker = InMemoryBroker::new();
        let client = EventBusClient::connect(fast_config("concurrent"), &broker)
            .await
            .unwrap();

        let forks = Arc::new(Recorder::<Fork>::new());
        client.subscribe_fork_found(forks.clone()).await.unwrap();

        let publishers = (0..8).map(|worker| {
            let client = client.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    client
                        .publish_fork_found(fork(worker * 100 + i))
                        .await
                        .unwrap();
                }
            })
        });
        for joined in join_all(publishers).await {
            joined.unwrap();
        }

        assert!(wait_until(SETTLE, || forks.calls() == 200).await);
        let mut ids: Vec<_> = forks.seen().iter().map(|e| e.correlation_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 200);

        let report = client.diagnostics().await;
        assert_eq!(report.subscriptions, 1);
        assert_eq!(report.handlers, 1);
        assert_eq!(report.stream_stats.unwrap().messages, 200);

        client.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clients_with_same_consumer_name_share_work() {
        let broker = InMemoryBroker::new();
        let first = EventBusClient::connect(fast_config("shared"), &broker)
            .await
            .unwrap();
        let second = EventBusClient::connect(fast_config("shared"), &broker)
            .await
            .unwrap();

        let first_forks = Arc::new(Recorder::<Fork>::new());
        let second_forks = Arc::new(Recorder::<Fork>::new());
        first.subscribe_fork_found(first_forks.clone()).await.unwrap();
        // Binds the durable the first client created.
        second
            .subscribe_fork_found(second_forks.clone())
            .await
            .unwrap();

        for correlation_id in 0..40 {
            first.publish_fork_found(fork(correlation_id)).await.unwrap();
        }

        assert!(
            wait_until(SETTLE, || first_forks.calls() + second_forks.calls() == 40).await
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut ids: Vec<_> = first_forks
            .seen()
            .iter()
            .chain(second_forks.seen().iter())
            .map(|e| e.correlation_id())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..40).collect::<Vec<CorrelationId>>());
        assert_eq!(broker.ack_pending("EVENTS", "shared_events_fork_found"), Some(0));

        first.close().await.unwrap();
        second.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_publish_racing_close_is_well_defined() {
        let broker = InMemoryBroker::new();
        let client = EventBusClient::connect(fast_config("race"), &broker)
            .await
            .unwrap();

        let publishers: Vec<_> = (0..4)
            .map(|worker| {
                let client = client.clone();
                tokio::spawn(async move {
                    let mut outcomes = Vec::new();
                    for i in 0..50 {
                        outcomes.push(client.publish_fork_found(fork(worker * 100 + i)).await);
                    }
                    outcomes
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(1)).await;
        client.close().await.unwrap();

        for joined in join_all(publishers).await {
            for outcome in joined.unwrap() {
                assert!(matches!(
                    outcome,
                    Ok(_) | Err(BusError::ClientClosed)
                ));
            }
        }
    }
}
