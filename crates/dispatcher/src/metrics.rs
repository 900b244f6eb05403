//! Dispatcher metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Counters of one dispatcher
///
/// Shared through an `Arc` so a handle can read them while the dispatcher
/// task runs.
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    read_requests: AtomicU64,
    replay_requests: AtomicU64,
    read_failures: AtomicU64,
    read_cycles: AtomicU64,
    entries_read: AtomicU64,
    sends: AtomicU64,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    markers_acknowledged: AtomicU64,
    malformed_entries: AtomicU64,
    redeliveries_tracked: AtomicU64,
    /// Current redelivery backlog
    redelivery_backlog: AtomicUsize,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_read_requests(&self) {
        self.read_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replay_requests(&self) {
        self.replay_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_read_failures(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Account a completed read of `entries` entries
    pub fn record_read_cycle(&self, entries: usize) {
        self.read_cycles.fetch_add(1, Ordering::Relaxed);
        self.entries_read.fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub fn record_send(&self, messages: u32, bytes: u64) {
        self.sends.fetch_add(1, Ordering::Relaxed);
        self.messages_sent
            .fetch_add(u64::from(messages), Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_send_failures(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_markers_acknowledged(&self, count: usize) {
        self.markers_acknowledged
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_malformed_entries(&self, count: usize) {
        self.malformed_entries
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_redeliveries(&self, count: usize) {
        self.redeliveries_tracked
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn set_redelivery_backlog(&self, len: usize) {
        self.redelivery_backlog.store(len, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    pub fn markers_acknowledged(&self) -> u64 {
        self.markers_acknowledged.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> DispatcherMetricsSnapshot {
        DispatcherMetricsSnapshot {
            read_requests: self.read_requests.load(Ordering::Relaxed),
            replay_requests: self.replay_requests.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            read_cycles: self.read_cycles.load(Ordering::Relaxed),
            entries_read: self.entries_read.load(Ordering::Relaxed),
            sends: self.sends(),
            messages_sent: self.messages_sent(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures(),
            markers_acknowledged: self.markers_acknowledged(),
            malformed_entries: self.malformed_entries.load(Ordering::Relaxed),
            redeliveries_tracked: self.redeliveries_tracked.load(Ordering::Relaxed),
            redelivery_backlog: self.redelivery_backlog.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherMetricsSnapshot {
    pub read_requests: u64,
    pub replay_requests: u64,
    pub read_failures: u64,
    pub read_cycles: u64,
    pub entries_read: u64,
    pub sends: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub markers_acknowledged: u64,
    pub malformed_entries: u64,
    pub redeliveries_tracked: u64,
    pub redelivery_backlog: usize,
}
