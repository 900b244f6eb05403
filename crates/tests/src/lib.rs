//! # Integration Tests
//!
//! Cross-crate and end-to-end tests.
//!
//! Covers:
//! - Configuration contract snapshots
//! - Protocol -> dispatcher handle -> in-memory consumers, no broker needed

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::DispatcherConfig;
    use validator::Validate;

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
        assert!(DispatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = ConfigLoader::load_from_str(
            "[subscription]\ntopic = \"persistent://public/default/t\"\nname = \"s\"\n",
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(config.dispatcher.max_read_batch_size, 100);
        assert_eq!(config.dispatcher.virtual_nodes, 100);
        assert!(config.dispatcher.redelivery_tracker_enabled);
        assert_eq!(config.dispatcher.event_queue_capacity, 1024);
        assert!(config.rate_limit.is_none());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        ConsumerId, DispatcherConfig, MessageMetadata, ParsedEntry, Position, SendBatch,
    };
    use dispatcher::mock::{MockConsumer, MockLog};
    use dispatcher::{
        DispatcherClient, DispatcherHandle, InMemoryRedeliveryTracker, UnlimitedRateLimiter,
    };
    use protocol::markers::{new_txn_commit_marker, TxnMarker};
    use tokio::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn spawn_dispatcher(log: &Arc<MockLog>, config: &DispatcherConfig) -> DispatcherHandle {
        DispatcherHandle::spawn(
            "persistent://public/default/orders:workers",
            config,
            Arc::clone(log),
            InMemoryRedeliveryTracker::default(),
            UnlimitedRateLimiter,
        )
    }

    fn publish_keyed(log: &MockLog, range: std::ops::Range<u64>, keys: u64) {
        for i in range {
            let metadata =
                MessageMetadata::new("producer", i).with_partition_key(format!("key-{}", i % keys));
            log.publish_message(&metadata, format!("m{i}").as_bytes())
                .unwrap();
        }
    }

    fn publish_marker(log: &MockLog, sequence_id: u64) -> Position {
        let txn = TxnMarker {
            txn_id_most_bits: 0,
            txn_id_least_bits: sequence_id,
        };
        log.publish(new_txn_commit_marker(sequence_id, txn).unwrap())
    }

    /// Acknowledge every send and grant its messages back
    fn spawn_acking(
        consumer_id: ConsumerId,
        client: DispatcherClient,
        mut rx: mpsc::UnboundedReceiver<SendBatch>,
    ) {
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                if batch.is_empty() {
                    continue;
                }
                let positions = batch.entries.iter().map(|e| e.position).collect();
                if client.acknowledge(consumer_id, positions).await.is_err()
                    || client.flow(consumer_id, batch.total_messages).await.is_err()
                {
                    break;
                }
            }
        });
    }

    async fn attach(
        client: &DispatcherClient,
        name: &str,
        permits: u32,
    ) -> (ConsumerId, MockConsumer) {
        let (consumer, rx) = MockConsumer::with_listener(name);
        let id = client.add_consumer(consumer.registration()).await.unwrap();
        spawn_acking(id, client.clone(), rx);
        client.flow(id, permits).await.unwrap();
        (id, consumer)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(TIMEOUT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition reached within timeout");
    }

    /// (key, sequence id) of every payload a consumer received, in order
    fn deliveries(consumer: &MockConsumer) -> Vec<(String, u64)> {
        consumer
            .sends()
            .iter()
            .flat_map(|batch| batch.entries.iter())
            .map(|entry| match protocol::parse_entry(entry).unwrap() {
                ParsedEntry::Payload { metadata, .. } => (
                    metadata.partition_key.clone().unwrap_or_default(),
                    metadata.sequence_id,
                ),
                ParsedEntry::Marker { kind, .. } => {
                    panic!("marker {} delivered at {}", kind.as_str(), entry.position)
                }
            })
            .collect()
    }

    fn owners(consumers: &[(&str, &MockConsumer)]) -> HashMap<String, String> {
        let mut owners = HashMap::new();
        for (name, consumer) in consumers {
            for (key, _) in deliveries(consumer) {
                if let Some(previous) = owners.insert(key.clone(), name.to_string()) {
                    assert_eq!(&previous, name, "key {key} split across consumers");
                }
            }
        }
        owners
    }

    fn assert_ordered_per_key(consumer: &MockConsumer) {
        let mut last: HashMap<String, u64> = HashMap::new();
        for (key, sequence_id) in deliveries(consumer) {
            if let Some(previous) = last.insert(key.clone(), sequence_id) {
                assert!(previous < sequence_id, "key {key}: {sequence_id} after {previous}");
            }
        }
    }

    /// Marker followed by five messages, one consumer with 1000 permits
    #[tokio::test]
    async fn test_e2e_leading_marker_boundary_send() {
        let log = Arc::new(MockLog::new(1));
        let marker = publish_marker(&log, 0);
        publish_keyed(&log, 0..5, 1);

        let handle = spawn_dispatcher(&log, &DispatcherConfig::default());
        let client = handle.client();
        let (_, consumer) = attach(&client, "c1", 1000).await;

        wait_until(|| log.is_fully_acknowledged()).await;
        assert_eq!(consumer.send_sizes(), vec![0, 5]);
        assert!(log.is_acknowledged(marker));

        let status = client.status().await.unwrap();
        assert_eq!(status.metrics.markers_acknowledged, 1);
        assert_eq!(status.metrics.sends, 2);
        handle.shutdown().await;
    }

    /// Keyed workload with markers over three consumers
    #[tokio::test]
    async fn test_e2e_sticky_ordered_delivery() {
        let log = Arc::new(MockLog::new(1));
        for chunk in 0..10u64 {
            publish_keyed(&log, chunk * 50..(chunk + 1) * 50, 40);
            publish_marker(&log, chunk);
        }

        let handle = spawn_dispatcher(&log, &DispatcherConfig::default());
        let client = handle.client();
        let (_, c1) = attach(&client, "c1", 20).await;
        let (_, c2) = attach(&client, "c2", 7).await;
        let (_, c3) = attach(&client, "c3", 100).await;

        wait_until(|| log.is_fully_acknowledged()).await;

        let consumers = [("c1", &c1), ("c2", &c2), ("c3", &c3)];
        let owners = owners(&consumers);
        assert_eq!(owners.len(), 40);
        let delivered: usize = consumers.iter().map(|(_, c)| deliveries(c).len()).sum();
        assert_eq!(delivered, 500);
        for (_, consumer) in &consumers {
            assert_ordered_per_key(consumer);
        }

        let status = client.status().await.unwrap();
        assert_eq!(status.redelivery_backlog, 0);
        assert_eq!(status.metrics.markers_acknowledged, 10);
        handle.shutdown().await;
    }

    /// A joining consumer only takes keys, never moves them between others
    #[tokio::test]
    async fn test_e2e_join_moves_keys_only_to_new_consumer() {
        let log = Arc::new(MockLog::new(1));
        publish_keyed(&log, 0..200, 100);

        let handle = spawn_dispatcher(&log, &DispatcherConfig::default());
        let client = handle.client();
        let (_, c1) = attach(&client, "c1", 1000).await;
        let (_, c2) = attach(&client, "c2", 1000).await;
        wait_until(|| log.is_fully_acknowledged()).await;
        let before = owners(&[("c1", &c1), ("c2", &c2)]);

        let (_, c3) = attach(&client, "c3", 1000).await;
        publish_keyed(&log, 200..400, 100);
        client.entries_available().await.unwrap();
        wait_until(|| log.is_fully_acknowledged()).await;

        let after = owners(&[("c1", &c1), ("c2", &c2), ("c3", &c3)]);
        assert_eq!(after.len(), 100);
        for (key, owner) in &after {
            if owner != "c3" {
                assert_eq!(before.get(key), Some(owner), "key {key} moved to {owner}");
            }
        }
        handle.shutdown().await;
    }

    /// Send failures detach the consumer and its keys move to the survivor
    #[tokio::test]
    async fn test_e2e_failing_consumer_is_detached() {
        let log = Arc::new(MockLog::new(1));
        publish_keyed(&log, 0..100, 20);

        let handle = spawn_dispatcher(&log, &DispatcherConfig::default());
        let client = handle.client();
        let (failing, rx) = MockConsumer::with_listener("broken");
        failing.set_failing(true);
        let broken_id = client.add_consumer(failing.registration()).await.unwrap();
        spawn_acking(broken_id, client.clone(), rx);
        client.flow(broken_id, 1000).await.unwrap();
        let (_, healthy) = attach(&client, "healthy", 1000).await;

        wait_until(|| log.is_fully_acknowledged()).await;

        assert!(failing.sends().is_empty());
        assert_eq!(deliveries(&healthy).len(), 100);
        assert_ordered_per_key(&healthy);

        let status = client.status().await.unwrap();
        assert_eq!(status.consumers.len(), 1);
        assert_eq!(status.consumers[0].name, "healthy");
        assert!(status.metrics.send_failures >= 1);
        handle.shutdown().await;
    }

    /// Removing a consumer with unacknowledged messages hands them to the survivor
    #[tokio::test]
    async fn test_e2e_remove_consumer_redelivers_unacked() {
        let log = Arc::new(MockLog::new(1));
        publish_keyed(&log, 0..50, 10);

        let handle = spawn_dispatcher(&log, &DispatcherConfig::default());
        let client = handle.client();

        // never acknowledges
        let silent = MockConsumer::new("silent");
        let silent_id = client.add_consumer(silent.registration()).await.unwrap();
        client.flow(silent_id, 1000).await.unwrap();
        wait_until(|| deliveries(&silent).len() == 50).await;

        let (_, survivor) = attach(&client, "survivor", 1000).await;
        client.remove_consumer(silent_id).await.unwrap();

        wait_until(|| log.is_fully_acknowledged()).await;
        assert_eq!(deliveries(&survivor).len(), 50);
        assert_ordered_per_key(&survivor);
        assert!(survivor
            .sends()
            .iter()
            .all(|batch| batch.redelivery_counts.iter().all(|count| *count == 1)));
        handle.shutdown().await;
    }
}
