//! # Selector
//!
//! Sticky-key consumer selection.
//!
//! Maps a routing key to one attached consumer so that every message with
//! the same key reaches the same consumer while membership is unchanged.
//! The consistent-hashing implementation bounds reassignment to roughly
//! `1/N` of the keys when one of `N` consumers joins or leaves.
//!
//! ```
//! use selector::{ConsistentHashingSelector, StickyKeyConsumerSelector};
//!
//! let mut selector = ConsistentHashingSelector::new(100);
//! selector.add_consumer(1, &"consumer-a".into());
//! selector.add_consumer(2, &"consumer-b".into());
//!
//! let owner = selector.select(b"order-42").unwrap();
//! assert_eq!(selector.select(b"order-42").unwrap(), owner);
//! ```

mod consistent;
mod ring;

pub use consistent::{ConsistentHashingSelector, SelectorSnapshot};
pub use ring::HashRing;

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use contracts::{ConsumerId, ConsumerName};
use thiserror::Error;

/// Selector errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectorError {
    /// The ring has no consumers
    #[error("no consumer available")]
    NoConsumerAvailable,
}

/// Hash of a sticky key in ring space
///
/// First four little-endian bytes of the key's BLAKE3 digest.
#[inline]
pub fn sticky_key_hash(key: &[u8]) -> u32 {
    let digest = blake3::hash(key);
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Key-to-consumer selection strategy
pub trait StickyKeyConsumerSelector: Send + Sync {
    /// Register a consumer; no-op when already present
    fn add_consumer(&mut self, id: ConsumerId, name: &ConsumerName);

    /// Unregister a consumer; no-op when absent
    fn remove_consumer(&mut self, id: ConsumerId);

    /// Consumer owning `key`
    fn select(&self, key: &[u8]) -> Result<ConsumerId, SelectorError> {
        self.select_by_hash(sticky_key_hash(key))
    }

    /// Consumer owning a precomputed key hash
    fn select_by_hash(&self, hash: u32) -> Result<ConsumerId, SelectorError>;

    /// Hash ranges owned by each consumer
    fn consumer_key_hash_ranges(&self) -> BTreeMap<ConsumerId, Vec<RangeInclusive<u32>>>;

    fn contains(&self, id: ConsumerId) -> bool;

    /// Number of consumers
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
