//! Workload published to the in-memory log.

use bytes::Bytes;
use contracts::{MessageMetadata, SimulationConfig};
use dispatcher::mock::MockLog;
use protocol::markers::{new_txn_commit_marker, TxnMarker};

use crate::error::Result;

/// Payload entries interleaved with periodic markers
#[derive(Debug, Clone)]
pub struct Workload {
    pub messages: u64,
    pub keys: u32,
    pub marker_interval: u64,
    pub batch_size: u32,
}

/// What [`Workload::publish`] appended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Published {
    pub payload_entries: u64,
    pub markers: u64,
    /// Logical messages across all payload entries
    pub messages: u64,
}

impl Workload {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            messages: config.messages,
            keys: config.keys.max(1),
            marker_interval: config.marker_interval,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Key of the `index`-th payload entry
    pub fn key_for(&self, index: u64) -> String {
        format!("key-{}", index % u64::from(self.keys))
    }

    /// Append the workload, sequence ids following publish order
    pub fn publish(&self, log: &MockLog) -> Result<Published> {
        let mut published = Published::default();

        for index in 0..self.messages {
            if self.marker_interval > 0 && index > 0 && index % self.marker_interval == 0 {
                let txn = TxnMarker {
                    txn_id_most_bits: 0,
                    txn_id_least_bits: published.markers,
                };
                log.publish(new_txn_commit_marker(index, txn)?);
                published.markers += 1;
            }

            let metadata = MessageMetadata::new("simulator", index)
                .with_partition_key(self.key_for(index))
                .with_batch_size(self.batch_size);
            let payload = Bytes::from(format!("message-{index}"));
            log.publish_message(&metadata, &payload)?;

            published.payload_entries += 1;
            published.messages += u64::from(self.batch_size);
        }

        Ok(published)
    }
}
