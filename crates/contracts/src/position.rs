//! Log addressing: `Position` and `LogEntry`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an entry in the persistent log.
///
/// Ordered by ledger first, then entry, which is the log order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub ledger_id: u64,
    pub entry_id: u64,
}

impl Position {
    #[inline]
    pub const fn new(ledger_id: u64, entry_id: u64) -> Self {
        Self {
            ledger_id,
            entry_id,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ledger_id, self.entry_id)
    }
}

/// An immutable entry read from the log.
///
/// `data` holds the serialized metadata and payload; cloning only bumps a
/// reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub position: Position,
    pub data: Bytes,
}

impl LogEntry {
    /// Create an entry at `ledger_id:entry_id`
    pub fn new(ledger_id: u64, entry_id: u64, data: impl Into<Bytes>) -> Self {
        Self {
            position: Position::new(ledger_id, entry_id),
            data: data.into(),
        }
    }

    /// Serialized length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
