//! Delivery verification and the simulation report.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use contracts::{ParsedEntry, Position, SendBatch};
use dispatcher::DispatcherMetricsSnapshot;
use observability::{DispatchStatsAggregator, DispatchSummary};
use serde::Serialize;

use super::workload::Published;

/// One delivered payload entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivery {
    key: String,
    sequence_id: u64,
    position: Position,
}

/// Everything one consumer received, in arrival order
#[derive(Debug, Clone, Default)]
pub struct ConsumerLog {
    pub consumer: String,
    deliveries: Vec<Delivery>,
    stats: DispatchStatsAggregator,
    violations: Vec<String>,
}

impl ConsumerLog {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            ..Default::default()
        }
    }

    /// Record one send
    pub fn record(&mut self, batch: &SendBatch) {
        self.stats
            .record_send(&self.consumer, batch.total_messages, batch.total_bytes);

        for entry in &batch.entries {
            match protocol::parse_entry(entry) {
                Ok(ParsedEntry::Payload { metadata, .. }) => {
                    let key = String::from_utf8_lossy(protocol::sticky_key(&metadata)).into_owned();
                    self.deliveries.push(Delivery {
                        key,
                        sequence_id: metadata.sequence_id,
                        position: entry.position,
                    });
                }
                Ok(ParsedEntry::Marker { kind, .. }) => self.violations.push(format!(
                    "marker {} at {} delivered to {}",
                    kind.as_str(),
                    entry.position,
                    self.consumer
                )),
                Err(e) => self.violations.push(format!(
                    "undecodable entry at {} delivered to {}: {e}",
                    entry.position, self.consumer
                )),
            }
        }
    }

    pub fn messages(&self) -> u64 {
        self.stats.total_messages
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub published: Published,
    pub duration: Duration,
    pub summary: DispatchSummary,
    pub metrics: DispatcherMetricsSnapshot,
    /// Distinct keys owned by each consumer
    pub keys_per_consumer: BTreeMap<String, usize>,
    pub violations: Vec<String>,
}

impl SimulationReport {
    /// Check stickiness, per-key order, duplicates and totals across consumers
    pub fn verify(
        published: Published,
        logs: Vec<ConsumerLog>,
        metrics: DispatcherMetricsSnapshot,
        duration: Duration,
    ) -> Self {
        let mut violations = Vec::new();
        let mut stats = DispatchStatsAggregator::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();
        let mut last_sequence: HashMap<&str, u64> = HashMap::new();
        let mut seen: HashSet<Position> = HashSet::new();
        let mut keys_per_consumer = BTreeMap::new();

        for log in &logs {
            stats.merge(&log.stats);
            violations.extend(log.violations.iter().cloned());
            let mut owned = HashSet::new();

            for delivery in &log.deliveries {
                if !seen.insert(delivery.position) {
                    violations.push(format!(
                        "entry {} delivered more than once",
                        delivery.position
                    ));
                }

                let owner = *owners.entry(&delivery.key).or_insert(&log.consumer);
                if owner != log.consumer {
                    violations.push(format!(
                        "key '{}' delivered to both {} and {}",
                        delivery.key, owner, log.consumer
                    ));
                }
                owned.insert(delivery.key.as_str());

                if let Some(previous) = last_sequence.insert(&delivery.key, delivery.sequence_id) {
                    if previous >= delivery.sequence_id {
                        violations.push(format!(
                            "key '{}' out of order: sequence {} after {}",
                            delivery.key, delivery.sequence_id, previous
                        ));
                    }
                }
            }
            keys_per_consumer.insert(log.consumer.clone(), owned.len());
        }

        let delivered: u64 = logs.iter().map(ConsumerLog::messages).sum();
        if delivered != published.messages {
            violations.push(format!(
                "{} messages published but {} delivered",
                published.messages, delivered
            ));
        }

        Self {
            published,
            duration,
            summary: stats.summary(),
            metrics,
            keys_per_consumer,
            violations,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// Messages per second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.summary.total_messages as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Simulation ===\n");
        println!("Duration: {:.3}s", self.duration.as_secs_f64());
        println!(
            "Published: {} entries, {} markers, {} messages",
            self.published.payload_entries, self.published.markers, self.published.messages
        );
        println!("Throughput: {:.0} msg/s", self.throughput());
        println!(
            "Reads: {} ({} replays, {} failed)",
            self.metrics.read_requests, self.metrics.replay_requests, self.metrics.read_failures
        );
        println!(
            "Markers acknowledged: {}, redeliveries: {}",
            self.metrics.markers_acknowledged, self.metrics.redeliveries_tracked
        );
        println!();
        print!("{}", self.summary);

        println!("Keys per consumer:");
        for (consumer, keys) in &self.keys_per_consumer {
            println!("  {consumer}: {keys}");
        }

        if self.is_ok() {
            println!("\nVerification: passed");
        } else {
            println!("\nVerification: {} violation(s)", self.violations.len());
            for violation in &self.violations {
                println!("  - {violation}");
            }
        }
        println!();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ReportView::from(self))
    }
}

/// Serializable view of a [`SimulationReport`]
#[derive(Serialize)]
struct ReportView<'a> {
    passed: bool,
    duration_secs: f64,
    payload_entries: u64,
    markers: u64,
    published_messages: u64,
    delivered_messages: u64,
    sends: u64,
    boundary_sends: u64,
    consumer_messages: &'a BTreeMap<String, u64>,
    keys_per_consumer: &'a BTreeMap<String, usize>,
    metrics: &'a DispatcherMetricsSnapshot,
    violations: &'a [String],
}

impl<'a> From<&'a SimulationReport> for ReportView<'a> {
    fn from(report: &'a SimulationReport) -> Self {
        Self {
            passed: report.is_ok(),
            duration_secs: report.duration.as_secs_f64(),
            payload_entries: report.published.payload_entries,
            markers: report.published.markers,
            published_messages: report.published.messages,
            delivered_messages: report.summary.total_messages,
            sends: report.summary.total_sends,
            boundary_sends: report.summary.boundary_sends,
            consumer_messages: &report.summary.consumer_messages,
            keys_per_consumer: &report.keys_per_consumer,
            metrics: &report.metrics,
            violations: &report.violations,
        }
    }
}
