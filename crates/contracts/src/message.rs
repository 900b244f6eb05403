//! Message metadata and the decoded view of a log entry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Metadata stored in front of every entry payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Producer that published the entry
    pub producer_name: String,

    /// Producer-assigned sequence id
    pub sequence_id: u64,

    /// Publish time (unix millis)
    pub publish_time: u64,

    /// Partition key, used as sticky key when no ordering key is set
    #[serde(default)]
    pub partition_key: Option<String>,

    /// Ordering key, takes precedence over the partition key
    #[serde(default)]
    pub ordering_key: Option<Vec<u8>>,

    /// Number of logical messages packed in this entry (producer batching)
    #[serde(default = "default_num_messages")]
    pub num_messages_in_batch: u32,

    /// Set when the entry is a control marker, never a payload
    #[serde(default)]
    pub marker_type: Option<MarkerType>,

    /// Source cluster of a replicated entry
    #[serde(default)]
    pub replicated_from: Option<String>,
}

fn default_num_messages() -> u32 {
    1
}

impl MessageMetadata {
    /// Metadata for a single message with the given key
    pub fn new(producer_name: impl Into<String>, sequence_id: u64) -> Self {
        Self {
            producer_name: producer_name.into(),
            sequence_id,
            num_messages_in_batch: 1,
            ..Default::default()
        }
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_ordering_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.ordering_key = Some(key.into());
        self
    }

    pub fn with_batch_size(mut self, num_messages: u32) -> Self {
        self.num_messages_in_batch = num_messages;
        self
    }

    pub fn with_publish_time(mut self, publish_time: u64) -> Self {
        self.publish_time = publish_time;
        self
    }

    /// Logical message count, never 0
    #[inline]
    pub fn num_messages(&self) -> u32 {
        self.num_messages_in_batch.max(1)
    }

    #[inline]
    pub fn is_marker(&self) -> bool {
        self.marker_type.is_some()
    }
}

/// Control marker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerType {
    ReplicatedSubscriptionSnapshotRequest,
    ReplicatedSubscriptionSnapshotResponse,
    ReplicatedSubscriptionSnapshot,
    ReplicatedSubscriptionUpdate,
    TxnCommit,
    TxnAbort,
}

impl MarkerType {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReplicatedSubscriptionSnapshotRequest => "replicated_subscription_snapshot_request",
            Self::ReplicatedSubscriptionSnapshotResponse => {
                "replicated_subscription_snapshot_response"
            }
            Self::ReplicatedSubscriptionSnapshot => "replicated_subscription_snapshot",
            Self::ReplicatedSubscriptionUpdate => "replicated_subscription_update",
            Self::TxnCommit => "txn_commit",
            Self::TxnAbort => "txn_abort",
        }
    }

    pub fn is_replicated_subscription(&self) -> bool {
        matches!(
            self,
            Self::ReplicatedSubscriptionSnapshotRequest
                | Self::ReplicatedSubscriptionSnapshotResponse
                | Self::ReplicatedSubscriptionSnapshot
                | Self::ReplicatedSubscriptionUpdate
        )
    }

    pub fn is_txn(&self) -> bool {
        matches!(self, Self::TxnCommit | Self::TxnAbort)
    }
}

/// Decoded view of a log entry
///
/// Decoded once per entry and matched exhaustively by the batch builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEntry {
    /// Application payload carrying one or more logical messages
    Payload {
        metadata: MessageMetadata,
        payload: Bytes,
    },
    /// Non-payload control record
    Marker { kind: MarkerType, body: Bytes },
}

impl ParsedEntry {
    #[inline]
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Marker { .. })
    }
}
