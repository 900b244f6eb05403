//! Consistent-hashing selector with snapshot-swap ring

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use arc_swap::ArcSwap;
use contracts::{ConsumerId, ConsumerName};
use tracing::debug;

use crate::ring::HashRing;
use crate::{sticky_key_hash, SelectorError, StickyKeyConsumerSelector};

/// Consistent-hashing consumer selector
///
/// Writers build a new [`HashRing`] and publish it atomically; readers load
/// the current snapshot without locking.
pub struct ConsistentHashingSelector {
    ring: Arc<ArcSwap<HashRing>>,
}

impl ConsistentHashingSelector {
    /// Create an empty selector with `virtual_nodes` positions per consumer
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            ring: Arc::new(ArcSwap::from_pointee(HashRing::new(virtual_nodes))),
        }
    }

    pub fn virtual_nodes(&self) -> u32 {
        self.ring.load().virtual_nodes()
    }

    /// Current ring
    pub fn ring(&self) -> Arc<HashRing> {
        self.ring.load_full()
    }

    /// Read handle that follows later membership changes
    pub fn snapshot(&self) -> SelectorSnapshot {
        SelectorSnapshot {
            ring: Arc::clone(&self.ring),
        }
    }

    fn publish(&self, next: HashRing) {
        self.ring.store(Arc::new(next));
    }
}

impl StickyKeyConsumerSelector for ConsistentHashingSelector {
    fn add_consumer(&mut self, id: ConsumerId, name: &ConsumerName) {
        let current = self.ring.load();
        if current.contains(id) {
            return;
        }
        let next = current.with_consumer(id, name);
        debug!(
            consumer_id = id,
            consumer = %name,
            consumers = next.len(),
            points = next.point_count(),
            "Consumer added to hash ring"
        );
        self.publish(next);
    }

    fn remove_consumer(&mut self, id: ConsumerId) {
        let current = self.ring.load();
        if !current.contains(id) {
            return;
        }
        let next = current.without_consumer(id);
        debug!(
            consumer_id = id,
            consumers = next.len(),
            points = next.point_count(),
            "Consumer removed from hash ring"
        );
        self.publish(next);
    }

    fn select_by_hash(&self, hash: u32) -> Result<ConsumerId, SelectorError> {
        self.ring
            .load()
            .lookup(hash)
            .ok_or(SelectorError::NoConsumerAvailable)
    }

    fn consumer_key_hash_ranges(&self) -> BTreeMap<ConsumerId, Vec<RangeInclusive<u32>>> {
        self.ring.load().key_hash_ranges()
    }

    fn contains(&self, id: ConsumerId) -> bool {
        self.ring.load().contains(id)
    }

    fn len(&self) -> usize {
        self.ring.load().len()
    }
}

impl std::fmt::Debug for ConsistentHashingSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.load();
        f.debug_struct("ConsistentHashingSelector")
            .field("virtual_nodes", &ring.virtual_nodes())
            .field("consumers", &ring.len())
            .finish()
    }
}

/// Cloneable lock-free read handle on a selector's ring
#[derive(Clone)]
pub struct SelectorSnapshot {
    ring: Arc<ArcSwap<HashRing>>,
}

impl SelectorSnapshot {
    pub fn select(&self, key: &[u8]) -> Result<ConsumerId, SelectorError> {
        self.select_by_hash(sticky_key_hash(key))
    }

    pub fn select_by_hash(&self, hash: u32) -> Result<ConsumerId, SelectorError> {
        self.ring
            .load()
            .lookup(hash)
            .ok_or(SelectorError::NoConsumerAvailable)
    }

    pub fn len(&self) -> usize {
        self.ring.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.load().is_empty()
    }
}
