//! Redelivery tracker interface

use crate::{ConsumerId, Position};

/// A message handed over for redelivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryEntry {
    pub position: Position,
    /// Consumer the message was last assigned to, if any
    pub consumer: Option<ConsumerId>,
    /// Hash of the message's sticky key, when known
    pub sticky_key_hash: Option<u32>,
    /// The consumer received the message before it was handed back
    pub delivered: bool,
}

impl RedeliveryEntry {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            consumer: None,
            sticky_key_hash: None,
            delivered: false,
        }
    }

    pub fn with_consumer(mut self, consumer: ConsumerId) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn with_sticky_key_hash(mut self, hash: u32) -> Self {
        self.sticky_key_hash = Some(hash);
        self
    }

    /// Hand back a message a consumer already received
    pub fn mark_delivered(mut self) -> Self {
        self.delivered = true;
        self
    }
}

/// Tracks messages that must be delivered again.
///
/// Owned by the dispatcher's serialized context; persistence is up to the
/// implementation.
pub trait RedeliveryTracker: Send {
    /// Schedule a message for redelivery
    fn track(&mut self, entry: RedeliveryEntry);

    fn is_scheduled_for_redelivery(&self, position: Position) -> bool;

    /// Whether any scheduled message carries this sticky key hash
    fn contains_sticky_key_hash(&self, hash: u32) -> bool;

    /// Lowest scheduled positions, ascending, without removing them
    fn next_positions(&self, max: usize) -> Vec<Position>;

    /// Unschedule a message after it was sent again
    fn remove(&mut self, position: Position) -> bool;

    /// Drop all state for an acknowledged message
    fn acknowledged(&mut self, position: Position);

    /// Number of times the message was handed back after a delivery
    ///
    /// Entries held back before ever reaching a consumer read 0.
    fn redelivery_count(&self, position: Position) -> u32;

    /// Number of scheduled messages
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
