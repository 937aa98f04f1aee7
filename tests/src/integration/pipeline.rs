//! # Pipeline Wiring
//!
//! The producer and consumer views used by pipeline services: one handler
//! for all three event kinds, the publisher/consumer pair handed out by
//! `factory`, and the runtime that observes every topic.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bus_runtime::BusRuntime;
    use parking_lot::Mutex;
    use shared_bus::{factory, EventBusClient, InMemoryBroker, Lifecycle, PipelineHandler};
    use shared_types::{
        CorrelationId, EventType, Fork, ForkFoundEvent, MatchBundleEvent, MatchMonitoringEvent,
    };

    use crate::fixtures::{fast_config, fork, match_bundle, monitoring, wait_until, Recorder};

    const SETTLE: Duration = Duration::from_secs(5);

    /// Records `(event_type, correlation_id)` for each event kind.
    #[derive(Default)]
    struct Journal {
        entries: Mutex<Vec<(EventType, CorrelationId)>>,
    }

    impl Journal {
        fn entries(&self) -> Vec<(EventType, CorrelationId)> {
            let mut entries = self.entries.lock().clone();
            entries.sort_by_key(|(kind, id)| (kind.as_str(), *id));
            entries
        }

        fn len(&self) -> usize {
            self.entries.lock().len()
        }
    }

    #[async_trait]
    impl PipelineHandler for Journal {
        async fn handle_match_bundle_found(&self, event: MatchBundleEvent) -> anyhow::Result<()> {
            self.entries
                .lock()
                .push((event.event_header.event_type, event.correlation_id()));
            Ok(())
        }

        async fn handle_match_monitoring(&self, event: MatchMonitoringEvent) -> anyhow::Result<()> {
            self.entries
                .lock()
                .push((event.event_header.event_type, event.correlation_id()));
            Ok(())
        }

        async fn handle_fork_found(&self, event: ForkFoundEvent) -> anyhow::Result<()> {
            self.entries
                .lock()
                .push((event.event_header.event_type, event.correlation_id()));
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pipeline_handler_receives_every_kind() {
        let broker = InMemoryBroker::new();
        let client = EventBusClient::connect(fast_config("pipeline"), &broker)
            .await
            .unwrap();

        let journal = Arc::new(Journal::default());
        client.subscribe_pipeline(journal.clone()).await.unwrap();

        let report = client.diagnostics().await;
        assert_eq!(report.subscriptions, 3);
        assert_eq!(report.handlers, 3);
        assert_eq!(
            report.topics,
            vec!["events.bundle.match", "events.match.monitoring", "events.fork.found"]
        );

        client.publish_match_bundle(match_bundle(1)).await.unwrap();
        client.publish_match_monitoring(monitoring(1)).await.unwrap();
        client.publish_fork_found(fork(1)).await.unwrap();
        client
            .publish_fork_found_correlated(fork(1), 2)
            .await
            .unwrap();

        assert!(wait_until(SETTLE, || journal.len() == 4).await);
        assert_eq!(
            journal.entries(),
            vec![
                (EventType::ForkFound, 1),
                (EventType::ForkFound, 2),
                (EventType::MatchBundle, 1),
                (EventType::MatchMonitoring, 1),
            ]
        );

        client.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_factory_publisher_feeds_consumer() {
        let broker = InMemoryBroker::new();
        let (publisher, consumer) = factory(fast_config("factory"), &broker).await.unwrap();

        let forks = Arc::new(Recorder::<Fork>::new());
        consumer.subscribe_fork_found(forks.clone()).await.unwrap();

        for correlation_id in 1..=3 {
            publisher.publish_fork_found(fork(correlation_id)).await.unwrap();
        }
        assert!(wait_until(SETTLE, || forks.calls() == 3).await);

        consumer.unsubscribe_all().await.unwrap();
        consumer.close().await.unwrap();
        // Both views share one client.
        assert!(publisher.publish_fork_found(fork(4)).await.is_err());
        publisher.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_runtime_observes_published_traffic() {
        let broker = InMemoryBroker::new();
        let runtime = BusRuntime::start(fast_config("runtime"), &broker)
            .await
            .unwrap();

        let producer = EventBusClient::connect(fast_config("upstream"), &broker)
            .await
            .unwrap();
        producer.publish_match_bundle(match_bundle(8)).await.unwrap();
        producer.publish_match_monitoring(monitoring(8)).await.unwrap();
        producer.publish_fork_found(fork(8)).await.unwrap();

        assert!(
            wait_until(SETTLE, || {
                let counts = runtime.counts();
                counts.match_bundles == 1 && counts.monitoring == 1 && counts.forks == 1
            })
            .await
        );

        let report = runtime.shutdown().await.unwrap();
        assert_eq!(report.state, Lifecycle::Closed);
        assert_eq!(report.metrics.acked, 3);
        producer.close().await.unwrap();
    }
}
