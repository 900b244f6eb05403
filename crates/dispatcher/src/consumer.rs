//! Attached consumer record

use std::collections::BTreeMap;

use contracts::{ConsumerChannel, ConsumerId, ConsumerName, ConsumerRegistration, Position};
use serde::Serialize;

/// A consumer attached to the dispatcher
pub(crate) struct Consumer {
    pub id: ConsumerId,
    pub name: ConsumerName,
    pub epoch: u64,
    pub channel: Box<dyn ConsumerChannel>,
    /// Sent but unacknowledged positions with their sticky key hash
    pub pending_acks: BTreeMap<Position, u32>,
    pub messages_sent: u64,
}

impl Consumer {
    pub fn new(id: ConsumerId, registration: ConsumerRegistration) -> Self {
        Self {
            id,
            name: registration.name,
            epoch: registration.epoch,
            channel: registration.channel,
            pending_acks: BTreeMap::new(),
            messages_sent: 0,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.channel.is_writable()
    }

    pub fn info(&self, permits: u32) -> ConsumerInfo {
        ConsumerInfo {
            id: self.id,
            name: self.name.to_string(),
            epoch: self.epoch,
            permits,
            pending_acks: self.pending_acks.len(),
            writable: self.is_writable(),
            messages_sent: self.messages_sent,
        }
    }
}

/// Point-in-time view of an attached consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub name: String,
    pub epoch: u64,
    pub permits: u32,
    pub pending_acks: usize,
    pub writable: bool,
    pub messages_sent: u64,
}
