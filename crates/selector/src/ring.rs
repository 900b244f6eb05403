//! Immutable hash ring snapshot.
//!
//! Membership changes never mutate a published ring: `with_consumer` and
//! `without_consumer` build a new snapshot from the current one.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use contracts::{ConsumerId, ConsumerName};

use crate::sticky_key_hash;

/// Ring of virtual-node positions
///
/// A position hashed by more than one consumer keeps its owners in
/// insertion order; the first owner answers lookups.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: BTreeMap<u32, Vec<ConsumerId>>,
    members: BTreeMap<ConsumerId, ConsumerName>,
    virtual_nodes: u32,
}

/// Ring position of a consumer's `index`-th virtual node
#[inline]
fn virtual_node_hash(name: &str, index: u32) -> u32 {
    sticky_key_hash(format!("{name}{index}").as_bytes())
}

impl HashRing {
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            points: BTreeMap::new(),
            members: BTreeMap::new(),
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    pub fn virtual_nodes(&self) -> u32 {
        self.virtual_nodes
    }

    /// Copy of this ring with `id` added
    pub fn with_consumer(&self, id: ConsumerId, name: &ConsumerName) -> Self {
        let mut next = self.clone();
        if next.members.contains_key(&id) {
            return next;
        }
        for index in 0..next.virtual_nodes {
            next.points
                .entry(virtual_node_hash(name, index))
                .or_default()
                .push(id);
        }
        next.members.insert(id, name.clone());
        next
    }

    /// Copy of this ring with `id` removed
    pub fn without_consumer(&self, id: ConsumerId) -> Self {
        let mut next = self.clone();
        let Some(name) = next.members.remove(&id) else {
            return next;
        };
        for index in 0..next.virtual_nodes {
            let hash = virtual_node_hash(&name, index);
            if let Some(owners) = next.points.get_mut(&hash) {
                owners.retain(|owner| *owner != id);
                if owners.is_empty() {
                    next.points.remove(&hash);
                }
            }
        }
        next
    }

    /// First position at or after `hash`, wrapping to the start
    pub fn lookup(&self, hash: u32) -> Option<ConsumerId> {
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .and_then(|(_, owners)| owners.first().copied())
    }

    pub fn contains(&self, id: ConsumerId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn name(&self, id: ConsumerId) -> Option<&ConsumerName> {
        self.members.get(&id)
    }

    /// Number of consumers
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of occupied ring positions
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Hash ranges owned by each consumer
    ///
    /// Each position owns the span after its predecessor up to and including
    /// itself; the first position also owns the wrap-around tail.
    pub fn key_hash_ranges(&self) -> BTreeMap<ConsumerId, Vec<RangeInclusive<u32>>> {
        let mut ranges: BTreeMap<ConsumerId, Vec<RangeInclusive<u32>>> = BTreeMap::new();
        let Some((&last, _)) = self.points.iter().next_back() else {
            return ranges;
        };

        let mut start = 0u32;
        for (index, (&point, owners)) in self.points.iter().enumerate() {
            let Some(&owner) = owners.first() else {
                continue;
            };
            let owned = ranges.entry(owner).or_default();
            owned.push(start..=point);
            if index == 0 && last < u32::MAX {
                owned.push(last + 1..=u32::MAX);
            }
            start = point.saturating_add(1);
        }
        ranges
    }
}
