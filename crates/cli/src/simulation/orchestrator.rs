//! Simulation orchestrator - coordinates log, dispatcher and consumers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{BrokerConfig, ConsumerId, SendBatch};
use dispatcher::mock::{MockConsumer, MockLog};
use dispatcher::{
    rate_limiter_from_config, DispatcherClient, DispatcherError, DispatcherHandle,
    InMemoryRedeliveryTracker,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::verify::{ConsumerLog, SimulationReport};
use super::workload::Workload;
use crate::error::{CliError, Result};

const LEDGER_ID: u64 = 1;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub config: BrokerConfig,
    pub timeout: Duration,
}

/// Runs a workload through a dispatcher task and in-process consumers
pub struct Simulation {
    settings: SimulationSettings,
}

impl Simulation {
    pub fn new(settings: SimulationSettings) -> Self {
        Self { settings }
    }

    /// Run to completion: every entry acknowledged, or timeout
    pub async fn run(self) -> Result<SimulationReport> {
        let config = &self.settings.config;
        let subscription = format!("{}:{}", config.subscription.topic, config.subscription.name);
        let workload = Workload::from_config(&config.simulation);

        let log = Arc::new(MockLog::new(LEDGER_ID));
        let published = workload.publish(&log)?;
        info!(
            entries = log.len(),
            markers = published.markers,
            messages = published.messages,
            "Workload published"
        );

        let handle = DispatcherHandle::spawn(
            subscription.as_str(),
            &config.dispatcher,
            Arc::clone(&log),
            InMemoryRedeliveryTracker::new(config.dispatcher.redelivery_tracker_enabled),
            rate_limiter_from_config(config.rate_limit.as_ref()),
        );
        let client = handle.client();

        let start_time = Instant::now();
        let mut consumer_tasks = Vec::with_capacity(config.simulation.consumers.len());
        for consumer_config in &config.simulation.consumers {
            if consumer_config.permits < workload.batch_size {
                warn!(
                    consumer = %consumer_config.name,
                    permits = consumer_config.permits,
                    batch_size = workload.batch_size,
                    "Permits below batch size, entries for this consumer cannot be sent"
                );
            }

            let (consumer, rx) = MockConsumer::with_listener(consumer_config.name.as_str());
            let consumer_id = client.add_consumer(consumer.registration()).await?;
            consumer_tasks.push(spawn_consumer(
                consumer_config.name.clone(),
                consumer_id,
                client.clone(),
                rx,
            ));
            client.flow(consumer_id, consumer_config.permits).await?;
        }
        info!(consumers = consumer_tasks.len(), "Consumers attached");

        let timeout = self.settings.timeout;
        let drained = tokio::time::timeout(timeout, async {
            while !log.is_fully_acknowledged() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();
        let duration = start_time.elapsed();

        let metrics = handle.metrics().snapshot();
        drop(client);
        handle.shutdown().await;

        // consumer listeners close once the dispatcher dropped its channels
        let mut logs = Vec::with_capacity(consumer_tasks.len());
        for (name, task) in consumer_tasks {
            let consumer_log = task
                .await
                .map_err(|e| CliError::consumer_task(name, e.to_string()))?;
            logs.push(consumer_log);
        }

        if !drained {
            return Err(CliError::SimulationTimeout {
                secs: timeout.as_secs(),
                unacknowledged: log.len() - log.acknowledged_count(),
            });
        }

        info!(
            duration_secs = duration.as_secs_f64(),
            sends = metrics.sends,
            "Simulation drained"
        );
        Ok(SimulationReport::verify(published, logs, metrics, duration))
    }
}

/// Consumer loop: record, acknowledge, and grant back what was received
fn spawn_consumer(
    name: String,
    consumer_id: ConsumerId,
    client: DispatcherClient,
    mut rx: mpsc::UnboundedReceiver<SendBatch>,
) -> (String, JoinHandle<ConsumerLog>) {
    let task_name = name.clone();
    let task = tokio::spawn(async move {
        let mut log = ConsumerLog::new(task_name);

        while let Some(batch) = rx.recv().await {
            log.record(&batch);
            if batch.is_empty() {
                continue;
            }

            if let Err(e) = grant_back(&client, consumer_id, &batch).await {
                debug!(consumer = %log.consumer, error = %e, "Dispatcher gone");
                break;
            }
        }

        log
    });
    (name, task)
}

async fn grant_back(
    client: &DispatcherClient,
    consumer_id: ConsumerId,
    batch: &SendBatch,
) -> std::result::Result<(), DispatcherError> {
    let positions = batch.entries.iter().map(|entry| entry.position).collect();
    client.acknowledge(consumer_id, positions).await?;
    client.flow(consumer_id, batch.total_messages).await
}
