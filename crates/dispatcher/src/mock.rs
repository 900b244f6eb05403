//! In-memory collaborators
//!
//! Used by tests and by the CLI simulation, where no real log or client
//! transport is available.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use contracts::{
    ConsumerChannel, ConsumerName, ConsumerRegistration, ContractError, LogEntry, LogReader,
    ManagedCursor, MessageMetadata, Position, SendBatch, SendReceipt,
};
use protocol::ProtocolError;
use tokio::sync::mpsc;
use tracing::trace;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Requests recorded by a [`MockCursor`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorRequests {
    /// `max_entries` of every normal read
    pub reads: Vec<usize>,
    pub replays: Vec<Vec<Position>>,
    pub acknowledged: Vec<Position>,
}

/// Cursor that only records what the dispatcher asked for
///
/// Completions are fed to the dispatcher by the test itself.
#[derive(Debug, Clone)]
pub struct MockCursor {
    name: String,
    requests: Arc<Mutex<CursorRequests>>,
}

impl MockCursor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requests: Arc::new(Mutex::new(CursorRequests::default())),
        }
    }

    pub fn requests(&self) -> CursorRequests {
        lock(&self.requests).clone()
    }

    pub fn last_read(&self) -> Option<usize> {
        lock(&self.requests).reads.last().copied()
    }

    pub fn last_replay(&self) -> Option<Vec<Position>> {
        lock(&self.requests).replays.last().cloned()
    }
}

impl ManagedCursor for MockCursor {
    fn name(&self) -> &str {
        &self.name
    }

    fn request_read(&mut self, max_entries: usize) {
        lock(&self.requests).reads.push(max_entries);
    }

    fn request_replay(&mut self, positions: Vec<Position>) {
        lock(&self.requests).replays.push(positions);
    }

    fn acknowledge(&mut self, positions: &[Position]) {
        lock(&self.requests).acknowledged.extend_from_slice(positions);
    }
}

struct MockConsumerState {
    writable: AtomicBool,
    failing: AtomicBool,
    sends: Mutex<Vec<SendBatch>>,
    listener: Option<mpsc::UnboundedSender<SendBatch>>,
}

/// Consumer channel recording every send
///
/// Clones share state, so a test keeps one clone and registers another.
#[derive(Clone)]
pub struct MockConsumer {
    name: ConsumerName,
    state: Arc<MockConsumerState>,
}

impl MockConsumer {
    pub fn new(name: impl Into<ConsumerName>) -> Self {
        Self::build(name.into(), None)
    }

    /// Consumer that also forwards every accepted send to a receiver
    pub fn with_listener(
        name: impl Into<ConsumerName>,
    ) -> (Self, mpsc::UnboundedReceiver<SendBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(name.into(), Some(tx)), rx)
    }

    fn build(name: ConsumerName, listener: Option<mpsc::UnboundedSender<SendBatch>>) -> Self {
        Self {
            name,
            state: Arc::new(MockConsumerState {
                writable: AtomicBool::new(true),
                failing: AtomicBool::new(false),
                sends: Mutex::new(Vec::new()),
                listener,
            }),
        }
    }

    pub fn name(&self) -> &ConsumerName {
        &self.name
    }

    /// Registration carrying a clone of this channel
    pub fn registration(&self) -> ConsumerRegistration {
        ConsumerRegistration::new(self.name.clone(), Box::new(self.clone()))
    }

    pub fn set_writable(&self, writable: bool) {
        self.state.writable.store(writable, Ordering::Relaxed);
    }

    /// Make every following send fail
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::Relaxed);
    }

    pub fn sends(&self) -> Vec<SendBatch> {
        lock(&self.state.sends).clone()
    }

    /// `total_messages` of every send, in order
    pub fn send_sizes(&self) -> Vec<u32> {
        lock(&self.state.sends)
            .iter()
            .map(|batch| batch.total_messages)
            .collect()
    }

    /// Positions of every delivered entry, in delivery order
    pub fn delivered_positions(&self) -> Vec<Position> {
        lock(&self.state.sends)
            .iter()
            .flat_map(|batch| batch.entries.iter().map(|entry| entry.position))
            .collect()
    }
}

impl ConsumerChannel for MockConsumer {
    fn is_writable(&self) -> bool {
        self.state.writable.load(Ordering::Relaxed)
    }

    fn send_messages(&mut self, batch: SendBatch) -> Result<SendReceipt, ContractError> {
        if self.state.failing.load(Ordering::Relaxed) {
            return Err(ContractError::consumer_send(
                self.name.as_str(),
                "connection reset",
            ));
        }

        let receipt = SendReceipt {
            total_messages: batch.total_messages,
            total_bytes: batch.total_bytes,
        };
        trace!(consumer = %self.name, messages = receipt.total_messages, "Mock send");
        if let Some(listener) = &self.state.listener {
            // receiver may be gone once the consumer task stopped
            let _ = listener.send(batch.clone());
        }
        lock(&self.state.sends).push(batch);
        Ok(receipt)
    }
}

#[derive(Default)]
struct MockLogState {
    entries: Vec<LogEntry>,
    read_index: usize,
    acknowledged: BTreeSet<Position>,
}

/// Single-ledger in-memory log
///
/// Reads return immediately with whatever is available, possibly nothing.
/// Normal reads skip acknowledged entries, so a rewind never re-delivers
/// them.
pub struct MockLog {
    ledger_id: u64,
    state: Mutex<MockLogState>,
    fail_next_read: AtomicBool,
}

impl MockLog {
    pub fn new(ledger_id: u64) -> Self {
        Self {
            ledger_id,
            state: Mutex::new(MockLogState::default()),
            fail_next_read: AtomicBool::new(false),
        }
    }

    /// Append raw entry data
    pub fn publish(&self, data: Bytes) -> Position {
        let mut state = lock(&self.state);
        let position = Position::new(self.ledger_id, state.entries.len() as u64);
        state.entries.push(LogEntry {
            position,
            data,
        });
        position
    }

    /// Encode and append a message
    pub fn publish_message(
        &self,
        metadata: &MessageMetadata,
        payload: &[u8],
    ) -> Result<Position, ProtocolError> {
        let data = protocol::serialize_metadata_and_payload(metadata, payload)?;
        Ok(self.publish(data))
    }

    /// Let the next normal read fail once
    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries not yet returned by a normal read
    pub fn unread(&self) -> usize {
        let state = lock(&self.state);
        state.entries.len() - state.read_index
    }

    pub fn acknowledged_count(&self) -> usize {
        lock(&self.state).acknowledged.len()
    }

    pub fn is_acknowledged(&self, position: Position) -> bool {
        lock(&self.state).acknowledged.contains(&position)
    }

    /// Whether every published entry was acknowledged
    pub fn is_fully_acknowledged(&self) -> bool {
        let state = lock(&self.state);
        state.acknowledged.len() == state.entries.len()
    }
}

impl LogReader for MockLog {
    async fn read_entries(&self, max_entries: usize) -> Result<Vec<LogEntry>, ContractError> {
        if self.fail_next_read.swap(false, Ordering::Relaxed) {
            return Err(ContractError::log_read("mock", "injected read failure"));
        }
        let mut state = lock(&self.state);
        let mut read = Vec::new();
        while read.len() < max_entries && state.read_index < state.entries.len() {
            let entry = &state.entries[state.read_index];
            if !state.acknowledged.contains(&entry.position) {
                read.push(entry.clone());
            }
            state.read_index += 1;
        }
        Ok(read)
    }

    async fn replay_entries(
        &self,
        positions: Vec<Position>,
    ) -> Result<Vec<LogEntry>, ContractError> {
        let state = lock(&self.state);
        Ok(positions
            .into_iter()
            .filter(|p| p.ledger_id == self.ledger_id)
            .filter_map(|p| state.entries.get(p.entry_id as usize).cloned())
            .collect())
    }

    async fn acknowledge(&self, positions: Vec<Position>) -> Result<(), ContractError> {
        lock(&self.state).acknowledged.extend(positions);
        Ok(())
    }

    fn rewind(&self) {
        let mut state = lock(&self.state);
        let state = &mut *state;
        state.read_index = state
            .entries
            .iter()
            .position(|entry| !state.acknowledged.contains(&entry.position))
            .unwrap_or(state.entries.len());
    }
}
