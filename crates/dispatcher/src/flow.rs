//! Per-consumer permit accounting

use std::collections::BTreeMap;

use contracts::ConsumerId;

/// Permit counts of attached consumers
///
/// A consumer may receive up to its permit count in logical messages;
/// permits are granted by the client and consumed by successful sends.
#[derive(Debug, Clone)]
pub struct FlowController {
    permits: BTreeMap<ConsumerId, u32>,
    max_read_batch_size: usize,
}

impl FlowController {
    pub fn new(max_read_batch_size: usize) -> Self {
        Self {
            permits: BTreeMap::new(),
            max_read_batch_size: max_read_batch_size.max(1),
        }
    }

    /// Start tracking a consumer with zero permits
    pub fn register(&mut self, consumer: ConsumerId) {
        self.permits.entry(consumer).or_insert(0);
    }

    /// Stop tracking a consumer, returning its remaining permits
    pub fn unregister(&mut self, consumer: ConsumerId) -> Option<u32> {
        self.permits.remove(&consumer)
    }

    pub fn is_registered(&self, consumer: ConsumerId) -> bool {
        self.permits.contains_key(&consumer)
    }

    /// Add permits, returning the new total
    pub fn grant_permits(&mut self, consumer: ConsumerId, permits: u32) -> Option<u32> {
        let current = self.permits.get_mut(&consumer)?;
        *current = current.saturating_add(permits);
        Some(*current)
    }

    /// Whether `count` logical messages fit the consumer's permits
    pub fn can_send(&self, consumer: ConsumerId, count: u32, writable: bool) -> bool {
        writable && self.available_permits(consumer) >= count
    }

    /// Charge `count` messages after a successful send
    pub fn consume(&mut self, consumer: ConsumerId, count: u32) {
        if let Some(current) = self.permits.get_mut(&consumer) {
            *current = current.saturating_sub(count);
        }
    }

    pub fn available_permits(&self, consumer: ConsumerId) -> u32 {
        self.permits.get(&consumer).copied().unwrap_or(0)
    }

    pub fn total_available_permits(&self) -> u64 {
        self.permits.values().map(|p| u64::from(*p)).sum()
    }

    /// Entries to request on the next read
    ///
    /// Smallest positive permit count among `ready` consumers, capped by the
    /// read batch size; 0 when no ready consumer has permits.
    pub fn max_additional_read_size<I>(&self, ready: I) -> usize
    where
        I: IntoIterator<Item = ConsumerId>,
    {
        ready
            .into_iter()
            .map(|id| self.available_permits(id))
            .filter(|permits| *permits > 0)
            .min()
            .map_or(0, |permits| (permits as usize).min(self.max_read_batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_consume() {
        let mut flow = FlowController::new(100);
        flow.register(1);
        assert_eq!(flow.grant_permits(1, 10), Some(10));
        assert!(flow.can_send(1, 10, true));
        assert!(!flow.can_send(1, 11, true));
        assert!(!flow.can_send(1, 1, false));

        flow.consume(1, 4);
        assert_eq!(flow.available_permits(1), 6);
        flow.consume(1, 100);
        assert_eq!(flow.available_permits(1), 0);
    }

    #[test]
    fn test_grant_saturates() {
        let mut flow = FlowController::new(100);
        flow.register(1);
        flow.grant_permits(1, u32::MAX);
        assert_eq!(flow.grant_permits(1, 5), Some(u32::MAX));
    }

    #[test]
    fn test_unknown_consumer() {
        let mut flow = FlowController::new(100);
        assert_eq!(flow.grant_permits(9, 5), None);
        assert!(!flow.can_send(9, 1, true));
        assert_eq!(flow.available_permits(9), 0);
        assert_eq!(flow.unregister(9), None);
    }

    #[test]
    fn test_read_size_uses_smallest_ready_consumer() {
        let mut flow = FlowController::new(100);
        for (id, permits) in [(1, 40), (2, 7), (3, 0)] {
            flow.register(id);
            flow.grant_permits(id, permits);
        }
        assert_eq!(flow.max_additional_read_size([1, 2, 3]), 7);
        assert_eq!(flow.max_additional_read_size([1]), 40);
        assert_eq!(flow.max_additional_read_size([3]), 0);
        assert_eq!(flow.max_additional_read_size(Vec::new()), 0);
        assert_eq!(flow.total_available_permits(), 47);
    }

    #[test]
    fn test_read_size_capped_by_batch_size() {
        let mut flow = FlowController::new(100);
        flow.register(1);
        flow.grant_permits(1, 1000);
        assert_eq!(flow.max_additional_read_size([1]), 100);
    }
}
