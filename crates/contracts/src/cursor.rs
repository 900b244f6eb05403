//! Log/cursor collaborator interfaces.

use std::fmt;

use crate::{ContractError, LogEntry, Position};

/// Origin of a read completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadType {
    /// Read from the cursor's read position
    Normal,
    /// Re-read of positions scheduled for redelivery
    Replay,
}

impl fmt::Display for ReadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Replay => f.write_str("replay"),
        }
    }
}

/// Subscription cursor as seen by the dispatcher.
///
/// Requests are fire-and-forget: the cursor delivers the outcome later
/// through the dispatcher's `read_entries_complete` or `read_entries_failed`.
/// Read retry with backoff is the cursor's own concern.
pub trait ManagedCursor: Send {
    /// Cursor (subscription) name, used for logging
    fn name(&self) -> &str;

    /// Read up to `max_entries` entries past the read position
    fn request_read(&mut self, max_entries: usize);

    /// Re-read specific positions
    fn request_replay(&mut self, positions: Vec<Position>);

    /// Mark positions as consumed so the cursor can advance past them
    fn acknowledge(&mut self, positions: &[Position]);
}

/// Asynchronous log reader
///
/// Backs a [`ManagedCursor`] when the dispatcher runs inside its own task.
#[trait_variant::make(LogReader: Send)]
pub trait LocalLogReader {
    /// Read up to `max_entries` entries from the read position
    ///
    /// An empty result means no entries were available before the read
    /// timed out.
    async fn read_entries(&self, max_entries: usize) -> Result<Vec<LogEntry>, ContractError>;

    /// Read the given positions again
    async fn replay_entries(&self, positions: Vec<Position>)
        -> Result<Vec<LogEntry>, ContractError>;

    /// Persist consumption of positions
    async fn acknowledge(&self, positions: Vec<Position>) -> Result<(), ContractError>;

    /// Move the read position back to the oldest unacknowledged entry
    ///
    /// Called when a dispatcher attaches, so entries an earlier dispatcher
    /// read but never saw acknowledged are read again.
    fn rewind(&self);
}
