//! In-memory redelivery tracker

use std::collections::{BTreeMap, HashMap};

use contracts::{ConsumerId, Position, RedeliveryEntry, RedeliveryTracker};

/// Redelivery state kept in the dispatcher's memory
///
/// Scheduled positions are ordered so replays always start from the oldest
/// message. Only messages handed back after a delivery are counted.
/// Counting can be switched off, in which case every count reads as 0.
#[derive(Debug, Clone)]
pub struct InMemoryRedeliveryTracker {
    scheduled: BTreeMap<Position, Scheduled>,
    /// Scheduled messages per sticky key hash
    hashes: HashMap<u32, usize>,
    counts: HashMap<Position, u32>,
    counting: bool,
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    consumer: Option<ConsumerId>,
    sticky_key_hash: Option<u32>,
}

impl Default for InMemoryRedeliveryTracker {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InMemoryRedeliveryTracker {
    pub fn new(counting: bool) -> Self {
        Self {
            scheduled: BTreeMap::new(),
            hashes: HashMap::new(),
            counts: HashMap::new(),
            counting,
        }
    }

    /// Consumer a scheduled message was last assigned to
    pub fn last_consumer(&self, position: Position) -> Option<ConsumerId> {
        self.scheduled.get(&position).and_then(|s| s.consumer)
    }

    fn unschedule(&mut self, position: Position) -> bool {
        let Some(removed) = self.scheduled.remove(&position) else {
            return false;
        };
        if let Some(hash) = removed.sticky_key_hash {
            if let Some(count) = self.hashes.get_mut(&hash) {
                *count -= 1;
                if *count == 0 {
                    self.hashes.remove(&hash);
                }
            }
        }
        true
    }
}

impl RedeliveryTracker for InMemoryRedeliveryTracker {
    fn track(&mut self, entry: RedeliveryEntry) {
        if self.scheduled.contains_key(&entry.position) {
            return;
        }
        if let Some(hash) = entry.sticky_key_hash {
            *self.hashes.entry(hash).or_insert(0) += 1;
        }
        self.scheduled.insert(
            entry.position,
            Scheduled {
                consumer: entry.consumer,
                sticky_key_hash: entry.sticky_key_hash,
            },
        );
        if self.counting && entry.delivered {
            *self.counts.entry(entry.position).or_insert(0) += 1;
        }
    }

    fn is_scheduled_for_redelivery(&self, position: Position) -> bool {
        self.scheduled.contains_key(&position)
    }

    fn contains_sticky_key_hash(&self, hash: u32) -> bool {
        self.hashes.contains_key(&hash)
    }

    fn next_positions(&self, max: usize) -> Vec<Position> {
        self.scheduled.keys().take(max).copied().collect()
    }

    fn remove(&mut self, position: Position) -> bool {
        self.unschedule(position)
    }

    fn acknowledged(&mut self, position: Position) {
        self.unschedule(position);
        self.counts.remove(&position);
    }

    fn redelivery_count(&self, position: Position) -> u32 {
        self.counts.get(&position).copied().unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.scheduled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(entry_id: u64, hash: u32) -> RedeliveryEntry {
        RedeliveryEntry::new(Position::new(1, entry_id)).with_sticky_key_hash(hash)
    }

    #[test]
    fn test_next_positions_oldest_first() {
        let mut tracker = InMemoryRedeliveryTracker::default();
        for id in [5, 1, 3] {
            tracker.track(entry(id, 7));
        }
        assert_eq!(
            tracker.next_positions(2),
            vec![Position::new(1, 1), Position::new(1, 3)]
        );
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_hash_guard_follows_schedule() {
        let mut tracker = InMemoryRedeliveryTracker::default();
        tracker.track(entry(1, 7));
        tracker.track(entry(2, 7));
        assert!(tracker.contains_sticky_key_hash(7));

        assert!(tracker.remove(Position::new(1, 1)));
        assert!(tracker.contains_sticky_key_hash(7));
        tracker.acknowledged(Position::new(1, 2));
        assert!(!tracker.contains_sticky_key_hash(7));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_held_back_entries_are_not_counted() {
        let mut tracker = InMemoryRedeliveryTracker::default();
        let position = Position::new(1, 1);
        tracker.track(entry(1, 7).with_consumer(2));
        assert!(tracker.is_scheduled_for_redelivery(position));
        assert_eq!(tracker.redelivery_count(position), 0);

        tracker.remove(position);
        tracker.track(entry(1, 7).with_consumer(2).mark_delivered());
        assert_eq!(tracker.redelivery_count(position), 1);
    }

    #[test]
    fn test_counts_survive_send_but_not_ack() {
        let mut tracker = InMemoryRedeliveryTracker::default();
        let position = Position::new(1, 1);
        tracker.track(entry(1, 7).mark_delivered());
        tracker.track(entry(1, 7).mark_delivered());
        assert_eq!(tracker.redelivery_count(position), 1);

        tracker.remove(position);
        tracker.track(entry(1, 7).with_consumer(4).mark_delivered());
        assert_eq!(tracker.redelivery_count(position), 2);
        assert_eq!(tracker.last_consumer(position), Some(4));

        tracker.acknowledged(position);
        assert_eq!(tracker.redelivery_count(position), 0);
        assert!(!tracker.remove(position));
    }

    #[test]
    fn test_counting_disabled() {
        let mut tracker = InMemoryRedeliveryTracker::new(false);
        tracker.track(entry(1, 7).mark_delivered());
        assert!(tracker.is_scheduled_for_redelivery(Position::new(1, 1)));
        assert_eq!(tracker.redelivery_count(Position::new(1, 1)), 0);
    }
}
