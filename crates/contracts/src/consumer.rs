//! Consumer identity and the consumer channel interface.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::{ContractError, LogEntry};

/// Dispatcher-assigned consumer handle
pub type ConsumerId = u64;

/// Consumer name with cheap cloning.
///
/// The name is the consumer's identity on the hash ring, so it is hashed
/// once per virtual node and cloned into every ring snapshot. Internally an
/// `Arc<str>`.
///
/// # Examples
/// ```
/// use contracts::ConsumerName;
///
/// let name: ConsumerName = "consumer-a".into();
/// assert_eq!(name.clone(), name);
/// assert_eq!(name.as_str(), "consumer-a");
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerName(Arc<str>);

impl ConsumerName {
    #[inline]
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ConsumerName {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for ConsumerName {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConsumerName {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for ConsumerName {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for ConsumerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConsumerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConsumerName({:?})", self.0)
    }
}

impl PartialEq<str> for ConsumerName {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for ConsumerName {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl Serialize for ConsumerName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ConsumerName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

/// Logical message count of every entry in a send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryBatchSizes(Vec<u32>);

impl EntryBatchSizes {
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, num_messages: u32) {
        self.0.push(num_messages);
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.0.get(index).copied()
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-entry acknowledged batch indexes
///
/// `None` means no message inside that entry's batch has been acked yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryBatchIndexesAcks(Vec<Option<Vec<u64>>>);

impl EntryBatchIndexesAcks {
    /// No acked indexes for `len` entries
    pub fn none(len: usize) -> Self {
        Self(vec![None; len])
    }

    pub fn set(&mut self, index: usize, acked: Vec<u64>) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = Some(acked);
        }
    }

    pub fn get(&self, index: usize) -> Option<&[u64]> {
        self.0.get(index).and_then(|acks| acks.as_deref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One outbound send to a consumer
#[derive(Debug, Clone, Default)]
pub struct SendBatch {
    /// Entries in log order; empty for a marker boundary send
    pub entries: Vec<LogEntry>,
    pub batch_sizes: EntryBatchSizes,
    pub batch_index_acks: EntryBatchIndexesAcks,
    /// Sum of logical messages in `entries`
    pub total_messages: u32,
    pub total_bytes: u64,
    pub epoch: u64,
    /// Times each entry was handed to redelivery before this send
    pub redelivery_counts: Vec<u32>,
}

impl SendBatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accepted write returned by a consumer channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub total_messages: u32,
    pub total_bytes: u64,
}

/// Client channel of one attached consumer.
///
/// Implemented by the transport layer; the dispatcher only sees
/// writability and the send call.
pub trait ConsumerChannel: Send {
    /// Whether the underlying channel accepts writes right now
    fn is_writable(&self) -> bool;

    /// Write a batch to the client
    ///
    /// # Errors
    /// Returns `ContractError::ConsumerSend` when the channel is closed or
    /// the write fails.
    fn send_messages(&mut self, batch: SendBatch) -> Result<SendReceipt, ContractError>;
}

/// Everything needed to attach a consumer
pub struct ConsumerRegistration {
    pub name: ConsumerName,
    pub epoch: u64,
    pub channel: Box<dyn ConsumerChannel>,
}

impl ConsumerRegistration {
    pub fn new(name: impl Into<ConsumerName>, channel: Box<dyn ConsumerChannel>) -> Self {
        Self {
            name: name.into(),
            epoch: 0,
            channel,
        }
    }

    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }
}

impl fmt::Debug for ConsumerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRegistration")
            .field("name", &self.name)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
