//! Dispatch metrics
//!
//! Prometheus recorders called from the dispatcher, plus an in-memory
//! aggregator the CLI uses to print a run summary.

use std::collections::BTreeMap;

use metrics::{counter, gauge, histogram};

/// Record one completed read/dispatch cycle
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_dispatch_cycle;
///
/// record_dispatch_cycle("orders-sub", "normal", entries.len(), messages_sent);
/// ```
pub fn record_dispatch_cycle(subscription: &str, read_type: &str, entries: usize, messages: u64) {
    counter!(
        "sticky_dispatch_cycles_total",
        "subscription" => subscription.to_string(),
        "read_type" => read_type.to_string()
    )
    .increment(1);

    counter!(
        "sticky_dispatch_entries_read_total",
        "subscription" => subscription.to_string(),
        "read_type" => read_type.to_string()
    )
    .increment(entries as u64);

    histogram!(
        "sticky_dispatch_cycle_messages",
        "subscription" => subscription.to_string()
    )
    .record(messages as f64);
}

/// Record a successful send to a consumer
pub fn record_messages_sent(subscription: &str, consumer: &str, messages: u32, bytes: u64) {
    counter!(
        "sticky_dispatch_messages_sent_total",
        "subscription" => subscription.to_string(),
        "consumer" => consumer.to_string()
    )
    .increment(u64::from(messages));

    counter!(
        "sticky_dispatch_bytes_sent_total",
        "subscription" => subscription.to_string(),
        "consumer" => consumer.to_string()
    )
    .increment(bytes);

    histogram!(
        "sticky_dispatch_send_messages",
        "subscription" => subscription.to_string()
    )
    .record(f64::from(messages));
}

/// Record a marker entry consumed without delivery
pub fn record_marker_acknowledged(subscription: &str, marker_type: &str) {
    counter!(
        "sticky_dispatch_markers_acknowledged_total",
        "subscription" => subscription.to_string(),
        "marker_type" => marker_type.to_string()
    )
    .increment(1);
}

/// Record entries handed to the redelivery tracker
pub fn record_redelivery(subscription: &str, entries: usize, backlog: usize) {
    if entries > 0 {
        counter!(
            "sticky_dispatch_redeliveries_total",
            "subscription" => subscription.to_string()
        )
        .increment(entries as u64);
    }

    gauge!(
        "sticky_dispatch_redelivery_backlog",
        "subscription" => subscription.to_string()
    )
    .set(backlog as f64);
}

/// Record a failed send
pub fn record_send_failure(subscription: &str, consumer: &str) {
    counter!(
        "sticky_dispatch_send_failures_total",
        "subscription" => subscription.to_string(),
        "consumer" => consumer.to_string()
    )
    .increment(1);
}

/// Record a consumer's current permits
pub fn record_permits(subscription: &str, consumer: &str, permits: u32) {
    gauge!(
        "sticky_dispatch_consumer_permits",
        "subscription" => subscription.to_string(),
        "consumer" => consumer.to_string()
    )
    .set(f64::from(permits));
}

/// In-memory dispatch statistics
#[derive(Debug, Clone, Default)]
pub struct DispatchStatsAggregator {
    pub total_sends: u64,

    /// Zero-message sends forced by markers
    pub boundary_sends: u64,

    pub total_messages: u64,

    pub total_bytes: u64,

    pub send_failures: u64,

    /// Messages per non-empty send
    pub send_size_stats: RunningStats,

    pub consumer_messages: BTreeMap<String, u64>,
}

impl DispatchStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one send received by `consumer`
    pub fn record_send(&mut self, consumer: &str, messages: u32, bytes: u64) {
        self.total_sends += 1;
        if messages == 0 {
            self.boundary_sends += 1;
            return;
        }
        self.total_messages += u64::from(messages);
        self.total_bytes += bytes;
        self.send_size_stats.push(f64::from(messages));
        *self
            .consumer_messages
            .entry(consumer.to_string())
            .or_insert(0) += u64::from(messages);
    }

    pub fn record_failure(&mut self) {
        self.send_failures += 1;
    }

    /// Fold another aggregator into this one
    pub fn merge(&mut self, other: &DispatchStatsAggregator) {
        self.total_sends += other.total_sends;
        self.boundary_sends += other.boundary_sends;
        self.total_messages += other.total_messages;
        self.total_bytes += other.total_bytes;
        self.send_failures += other.send_failures;
        self.send_size_stats.merge(&other.send_size_stats);
        for (consumer, messages) in &other.consumer_messages {
            *self.consumer_messages.entry(consumer.clone()).or_insert(0) += messages;
        }
    }

    pub fn summary(&self) -> DispatchSummary {
        DispatchSummary {
            total_sends: self.total_sends,
            boundary_sends: self.boundary_sends,
            total_messages: self.total_messages,
            total_bytes: self.total_bytes,
            send_failures: self.send_failures,
            send_size: StatsSummary::from(&self.send_size_stats),
            consumer_messages: self.consumer_messages.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Printable dispatch summary
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub total_sends: u64,
    pub boundary_sends: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub send_failures: u64,
    pub send_size: StatsSummary,
    pub consumer_messages: BTreeMap<String, u64>,
}

impl std::fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Summary ===")?;
        writeln!(
            f,
            "Sends: {} (boundary: {})",
            self.total_sends, self.boundary_sends
        )?;
        writeln!(
            f,
            "Messages: {} ({} bytes)",
            self.total_messages, self.total_bytes
        )?;
        writeln!(f, "Send failures: {}", self.send_failures)?;
        writeln!(f, "Messages per send: {}", self.send_size)?;

        if !self.consumer_messages.is_empty() {
            writeln!(f, "Messages per consumer:")?;
            for (consumer, messages) in &self.consumer_messages {
                let share = if self.total_messages > 0 {
                    *messages as f64 / self.total_messages as f64 * 100.0
                } else {
                    0.0
                };
                writeln!(f, "  {}: {} ({:.2}%)", consumer, messages, share)?;
            }
        }

        Ok(())
    }
}

/// Summary of a [`RunningStats`]
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.2}, std={:.2} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// Combine two sample sets (Chan's parallel update)
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        self.m2 += other.m2 + delta * delta * (self.count * other.count) as f64 / count as f64;
        self.mean = mean;
        self.count = count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
