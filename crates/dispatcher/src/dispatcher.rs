//! StickyKeyDispatcher - per-subscription dispatch state machine
//!
//! All operations run on one serialized context (see [`crate::handle`]).
//! At most one read is outstanding; its completion is routed through the
//! batch builder and sent to consumers before the next read is sized.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    ConsumerId, ConsumerRegistration, ContractError, DispatchRateLimiter, DispatcherConfig,
    EntryBatchIndexesAcks, LogEntry, ManagedCursor, Position, RateDecision, ReadType,
    RedeliveryEntry, RedeliveryTracker, SendBatch, SendReceipt,
};
use observability::metrics as recorder;
use selector::{ConsistentHashingSelector, StickyKeyConsumerSelector};
use tracing::{debug, error, info, instrument, warn};

use crate::batch::{BatchBuilder, DispatchPlan, SendGroup};
use crate::consumer::{Consumer, ConsumerInfo};
use crate::error::DispatcherError;
use crate::flow::FlowController;
use crate::metrics::DispatcherMetrics;

/// Delay before reading again after a failed read
pub const READ_FAILURE_BACKOFF: Duration = Duration::from_millis(100);

/// Dispatcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Nothing in progress
    Idle,
    /// A read was requested and has not completed
    ReadPending(ReadType),
    /// Routing a read completion
    Dispatching,
    /// No attached consumer has permits
    Blocked,
    Closed,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::ReadPending(read_type) => write!(f, "read_pending({read_type})"),
            Self::Dispatching => f.write_str("dispatching"),
            Self::Blocked => f.write_str("blocked"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Sticky-key dispatcher for one shared subscription
pub struct StickyKeyDispatcher<C, R, L> {
    subscription: String,
    cursor: C,
    tracker: R,
    rate_limiter: L,
    selector: ConsistentHashingSelector,
    flow: FlowController,
    consumers: BTreeMap<ConsumerId, Consumer>,
    next_consumer_id: ConsumerId,
    state: DispatcherState,
    /// Read in flight, tracked apart from `state` so a detach or close
    /// while reading cannot lead to a second read
    pending_read: Option<ReadType>,
    /// Last replay delivered nothing; normal reads go first until the next
    /// permit grant or membership change
    replay_stalled: bool,
    /// Earliest time the next read may be issued
    next_read_at: Option<Instant>,
    metrics: Arc<DispatcherMetrics>,
}

impl<C, R, L> StickyKeyDispatcher<C, R, L>
where
    C: ManagedCursor,
    R: RedeliveryTracker,
    L: DispatchRateLimiter,
{
    pub fn new(
        subscription: impl Into<String>,
        config: &DispatcherConfig,
        cursor: C,
        tracker: R,
        rate_limiter: L,
    ) -> Self {
        Self {
            subscription: subscription.into(),
            cursor,
            tracker,
            rate_limiter,
            selector: ConsistentHashingSelector::new(config.virtual_nodes),
            flow: FlowController::new(config.max_read_batch_size),
            consumers: Default::default(),
            next_consumer_id: 1,
            state: DispatcherState::Idle,
            pending_read: None,
            replay_stalled: false,
            next_read_at: None,
            metrics: Arc::new(DispatcherMetrics::new()),
        }
    }

    /// Attach a consumer
    ///
    /// # Errors
    /// `Closed` after [`close`](Self::close); `ConsumerAlreadyAttached` when
    /// a consumer with the same name is attached.
    #[instrument(
        name = "dispatcher_add_consumer",
        skip(self, registration),
        fields(subscription = %self.subscription, consumer = %registration.name)
    )]
    pub fn add_consumer(
        &mut self,
        registration: ConsumerRegistration,
    ) -> Result<ConsumerId, DispatcherError> {
        if self.state == DispatcherState::Closed {
            return Err(DispatcherError::Closed);
        }
        if self
            .consumers
            .values()
            .any(|consumer| consumer.name == registration.name)
        {
            return Err(DispatcherError::ConsumerAlreadyAttached(
                registration.name.to_string(),
            ));
        }

        let id = self.next_consumer_id;
        self.next_consumer_id += 1;
        self.selector.add_consumer(id, &registration.name);
        self.flow.register(id);
        self.consumers.insert(id, Consumer::new(id, registration));
        self.replay_stalled = false;

        info!(
            consumer_id = id,
            consumers = self.consumers.len(),
            "Consumer attached"
        );
        self.unblock_and_read();
        Ok(id)
    }

    /// Detach a consumer, handing its unacknowledged messages to redelivery
    #[instrument(
        name = "dispatcher_remove_consumer",
        skip(self),
        fields(subscription = %self.subscription)
    )]
    pub fn remove_consumer(&mut self, consumer_id: ConsumerId) -> Result<(), DispatcherError> {
        let consumer = self
            .detach(consumer_id)
            .ok_or(DispatcherError::UnknownConsumer(consumer_id))?;
        info!(
            consumer_id,
            consumer = %consumer.name,
            consumers = self.consumers.len(),
            "Consumer detached"
        );

        self.replay_stalled = false;
        if self.consumers.is_empty() {
            if self.state != DispatcherState::Closed {
                self.state = DispatcherState::Idle;
            }
            return Ok(());
        }
        self.unblock_and_read();
        Ok(())
    }

    /// Grant permits to a consumer
    #[instrument(
        name = "dispatcher_consumer_flow",
        skip(self),
        fields(subscription = %self.subscription)
    )]
    pub fn consumer_flow(
        &mut self,
        consumer_id: ConsumerId,
        permits: u32,
    ) -> Result<(), DispatcherError> {
        let consumer = self
            .consumers
            .get(&consumer_id)
            .ok_or(DispatcherError::UnknownConsumer(consumer_id))?;
        let total = self
            .flow
            .grant_permits(consumer_id, permits)
            .ok_or(DispatcherError::UnknownConsumer(consumer_id))?;
        recorder::record_permits(&self.subscription, &consumer.name, total);
        debug!(consumer_id, permits, total, "Permits granted");

        self.replay_stalled = false;
        self.unblock_and_read();
        Ok(())
    }

    /// Route the entries of a completed read
    #[instrument(
        name = "dispatcher_read_entries_complete",
        skip(self, entries),
        fields(subscription = %self.subscription, read_type = %read_type, entries = entries.len())
    )]
    pub fn read_entries_complete(&mut self, entries: Vec<LogEntry>, read_type: ReadType) {
        if self.pending_read.take() != Some(read_type) {
            debug!("Read completion does not match the pending read");
        }
        if self.state == DispatcherState::Closed {
            debug!("Dispatcher closed, read completion discarded");
            return;
        }

        let entry_count = entries.len();
        self.metrics.record_read_cycle(entry_count);
        if entries.is_empty() {
            self.state = DispatcherState::Idle;
            if read_type == ReadType::Replay {
                self.replay_stalled = true;
                self.read_more_entries();
            } else if !self.replay_stalled && !self.tracker.is_empty() {
                self.read_more_entries();
            }
            return;
        }

        self.state = DispatcherState::Dispatching;
        let writable: BTreeSet<ConsumerId> = self
            .consumers
            .values()
            .filter(|consumer| consumer.is_writable())
            .map(|consumer| consumer.id)
            .collect();
        let plan = BatchBuilder::new(
            read_type,
            &self.selector,
            &self.flow,
            &writable,
            &self.tracker,
        )
        .build(entries);

        let messages = self.apply_plan(plan, read_type);
        if read_type == ReadType::Replay && messages == 0 {
            debug!("Replay delivered nothing, normal reads resume");
            self.replay_stalled = true;
        }
        recorder::record_dispatch_cycle(
            &self.subscription,
            &read_type.to_string(),
            entry_count,
            messages,
        );

        self.state = DispatcherState::Idle;
        self.read_more_entries();
    }

    /// Handle a failed read; the next read is retried after a short backoff
    pub fn read_entries_failed(&mut self, error: ContractError, read_type: ReadType) {
        self.pending_read = None;
        if self.state == DispatcherState::Closed {
            return;
        }
        self.metrics.inc_read_failures();
        warn!(
            subscription = %self.subscription,
            read_type = %read_type,
            error = %error,
            "Read failed"
        );
        if read_type == ReadType::Replay {
            self.replay_stalled = true;
        }
        self.next_read_at = Some(Instant::now() + READ_FAILURE_BACKOFF);
        self.state = DispatcherState::Idle;
    }

    /// Consumer acknowledged messages
    pub fn acknowledge(
        &mut self,
        consumer_id: ConsumerId,
        positions: &[Position],
    ) -> Result<(), DispatcherError> {
        let consumer = self
            .consumers
            .get_mut(&consumer_id)
            .ok_or(DispatcherError::UnknownConsumer(consumer_id))?;
        for position in positions {
            consumer.pending_acks.remove(position);
            self.tracker.acknowledged(*position);
        }
        self.cursor.acknowledge(positions);
        self.metrics.set_redelivery_backlog(self.tracker.len());
        Ok(())
    }

    /// Consumer asked for its unacknowledged messages again
    ///
    /// Returns the number of messages scheduled.
    pub fn redeliver_unacknowledged(
        &mut self,
        consumer_id: ConsumerId,
    ) -> Result<usize, DispatcherError> {
        let consumer = self
            .consumers
            .get_mut(&consumer_id)
            .ok_or(DispatcherError::UnknownConsumer(consumer_id))?;
        let pending = std::mem::take(&mut consumer.pending_acks);
        let count = pending.len();
        for (position, hash) in pending {
            self.tracker.track(
                RedeliveryEntry::new(position)
                    .with_consumer(consumer_id)
                    .with_sticky_key_hash(hash)
                    .mark_delivered(),
            );
        }
        self.note_redeliveries(count);
        debug!(consumer_id, count, "Unacknowledged messages scheduled for redelivery");

        self.replay_stalled = false;
        self.unblock_and_read();
        Ok(count)
    }

    /// New entries were appended to the log
    pub fn entries_available(&mut self) {
        if self.state == DispatcherState::Idle {
            self.read_more_entries();
        }
    }

    /// Stop dispatching
    ///
    /// A read in flight may still complete; its entries are dropped without
    /// delivery and the cursor is not advanced.
    pub fn close(&mut self) {
        if self.state == DispatcherState::Closed {
            return;
        }
        self.state = DispatcherState::Closed;
        info!(
            subscription = %self.subscription,
            pending_read = ?self.pending_read,
            consumers = self.consumers.len(),
            "Dispatcher closed"
        );
    }

    /// Size and issue the next read if nothing prevents it
    pub fn read_more_entries(&mut self) {
        let now = Instant::now();
        if let Some(at) = self.next_read_at {
            if now < at {
                return;
            }
            self.next_read_at = None;
        }
        if self.pending_read.is_some()
            || matches!(
                self.state,
                DispatcherState::Closed | DispatcherState::Dispatching
            )
        {
            return;
        }
        if self.consumers.is_empty() {
            self.state = DispatcherState::Idle;
            return;
        }

        let ready: Vec<ConsumerId> = self
            .consumers
            .values()
            .filter(|consumer| consumer.is_writable())
            .map(|consumer| consumer.id)
            .collect();
        let mut max_entries = self.flow.max_additional_read_size(ready);
        if max_entries == 0 {
            if self.state != DispatcherState::Blocked {
                debug!(
                    subscription = %self.subscription,
                    consumers = self.consumers.len(),
                    "No consumer has permits, dispatch blocked"
                );
            }
            self.state = DispatcherState::Blocked;
            return;
        }

        if self.rate_limiter.is_dispatch_needed() {
            match self.rate_limiter.acquire(now) {
                RateDecision::Throttle { retry_after } => {
                    debug!(
                        subscription = %self.subscription,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Dispatch rate exceeded"
                    );
                    self.next_read_at = Some(now + retry_after);
                    self.state = DispatcherState::Idle;
                    return;
                }
                RateDecision::Permit {
                    max_messages: Some(limit),
                } => max_entries = max_entries.min(limit.max(1)),
                RateDecision::Permit { max_messages: None } => {}
            }
        }

        if !self.replay_stalled && !self.tracker.is_empty() {
            let positions = self.tracker.next_positions(max_entries);
            if !positions.is_empty() {
                debug!(
                    subscription = %self.subscription,
                    positions = positions.len(),
                    "Replaying messages"
                );
                self.begin_read(ReadType::Replay);
                self.metrics.inc_replay_requests();
                self.cursor.request_replay(positions);
                return;
            }
        }

        self.begin_read(ReadType::Normal);
        self.metrics.inc_read_requests();
        self.cursor.request_read(max_entries);
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn pending_read(&self) -> Option<ReadType> {
        self.pending_read
    }

    pub fn is_replay_stalled(&self) -> bool {
        self.replay_stalled
    }

    /// When set, no read is issued before this instant
    pub fn next_read_at(&self) -> Option<Instant> {
        self.next_read_at
    }

    pub fn consumers(&self) -> Vec<ConsumerInfo> {
        self.consumers
            .values()
            .map(|consumer| consumer.info(self.flow.available_permits(consumer.id)))
            .collect()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn available_permits(&self, consumer_id: ConsumerId) -> Option<u32> {
        self.flow
            .is_registered(consumer_id)
            .then(|| self.flow.available_permits(consumer_id))
    }

    pub fn metrics(&self) -> &Arc<DispatcherMetrics> {
        &self.metrics
    }

    pub fn selector(&self) -> &ConsistentHashingSelector {
        &self.selector
    }

    pub fn redelivery(&self) -> &R {
        &self.tracker
    }

    pub fn cursor(&self) -> &C {
        &self.cursor
    }

    fn begin_read(&mut self, read_type: ReadType) {
        self.pending_read = Some(read_type);
        self.state = DispatcherState::ReadPending(read_type);
    }

    fn unblock_and_read(&mut self) {
        if self.state == DispatcherState::Blocked {
            self.state = DispatcherState::Idle;
        }
        self.read_more_entries();
    }

    /// Remove a consumer everywhere and schedule its unacked messages
    fn detach(&mut self, consumer_id: ConsumerId) -> Option<Consumer> {
        let mut consumer = self.consumers.remove(&consumer_id)?;
        self.selector.remove_consumer(consumer_id);
        self.flow.unregister(consumer_id);

        let pending = std::mem::take(&mut consumer.pending_acks);
        let count = pending.len();
        for (position, hash) in pending {
            self.tracker.track(
                RedeliveryEntry::new(position)
                    .with_consumer(consumer_id)
                    .with_sticky_key_hash(hash)
                    .mark_delivered(),
            );
        }
        self.note_redeliveries(count);
        Some(consumer)
    }

    fn note_redeliveries(&self, count: usize) {
        let backlog = self.tracker.len();
        self.metrics.add_redeliveries(count);
        self.metrics.set_redelivery_backlog(backlog);
        recorder::record_redelivery(&self.subscription, count, backlog);
    }

    /// Perform the sends of a plan and apply its side effects
    ///
    /// Returns the logical messages delivered.
    fn apply_plan(&mut self, plan: DispatchPlan, read_type: ReadType) -> u64 {
        let DispatchPlan {
            groups,
            acknowledged,
            redeliver,
            skipped,
            markers,
            malformed,
            unroutable,
        } = plan;
        if !skipped.is_empty() {
            debug!(skipped = skipped.len(), "Entries skipped by redelivery state");
        }

        let mut requeue = redeliver;
        let mut failed: BTreeSet<ConsumerId> = BTreeSet::new();
        let mut messages_sent = 0u64;

        for group in groups {
            if failed.contains(&group.consumer) || !self.consumers.contains_key(&group.consumer) {
                requeue.extend(group.into_redelivery());
                continue;
            }
            match self.send_group(&group, read_type) {
                Ok(receipt) => messages_sent += u64::from(receipt.total_messages),
                Err(e) => {
                    warn!(
                        subscription = %self.subscription,
                        consumer_id = group.consumer,
                        entries = group.entries.len(),
                        error = %e,
                        "Send failed, consumer will be removed"
                    );
                    failed.insert(group.consumer);
                    requeue.extend(group.into_redelivery());
                }
            }
        }

        if !acknowledged.is_empty() {
            for position in &acknowledged {
                self.tracker.acknowledged(*position);
            }
            self.cursor.acknowledge(&acknowledged);
        }
        for (position, kind) in &markers {
            debug!(position = %position, marker = kind.as_str(), "Marker acknowledged");
            recorder::record_marker_acknowledged(&self.subscription, kind.as_str());
        }
        self.metrics.add_markers_acknowledged(markers.len());
        for e in &malformed {
            error!(subscription = %self.subscription, error = %e, "Malformed entry skipped");
        }
        self.metrics.add_malformed_entries(malformed.len());
        if let Some(e) = unroutable {
            debug!(
                subscription = %self.subscription,
                error = %e,
                "Entries held until a consumer attaches"
            );
        }

        let mut tracked = 0;
        for entry in requeue {
            if !self.tracker.is_scheduled_for_redelivery(entry.position) {
                self.tracker.track(entry);
                tracked += 1;
            }
        }
        self.note_redeliveries(tracked);

        for consumer_id in failed {
            if let Some(consumer) = self.detach(consumer_id) {
                warn!(
                    subscription = %self.subscription,
                    consumer_id,
                    consumer = %consumer.name,
                    "Consumer removed after send failure"
                );
            }
        }

        messages_sent
    }

    fn send_group(
        &mut self,
        group: &SendGroup,
        read_type: ReadType,
    ) -> Result<SendReceipt, DispatcherError> {
        let consumer_id = group.consumer;
        let redelivery_counts = group
            .entries
            .iter()
            .map(|entry| self.tracker.redelivery_count(entry.position))
            .collect();
        let consumer = self
            .consumers
            .get_mut(&consumer_id)
            .ok_or(DispatcherError::UnknownConsumer(consumer_id))?;

        let batch = SendBatch {
            entries: group.entries.clone(),
            batch_sizes: group.batch_sizes.clone(),
            batch_index_acks: EntryBatchIndexesAcks::none(group.entries.len()),
            total_messages: group.total_messages,
            total_bytes: group.total_bytes,
            epoch: consumer.epoch,
            redelivery_counts,
        };
        let receipt = consumer.channel.send_messages(batch).map_err(|source| {
            self.metrics.inc_send_failures();
            recorder::record_send_failure(&self.subscription, &consumer.name);
            DispatcherError::ConsumerSendFailure {
                consumer_id,
                source,
            }
        })?;

        for (entry, hash) in group.entries.iter().zip(&group.sticky_key_hashes) {
            consumer.pending_acks.insert(entry.position, *hash);
        }
        consumer.messages_sent += u64::from(group.total_messages);
        self.flow.consume(consumer_id, group.total_messages);
        if read_type == ReadType::Replay {
            for entry in &group.entries {
                self.tracker.remove(entry.position);
            }
        }

        self.metrics
            .record_send(group.total_messages, group.total_bytes);
        recorder::record_messages_sent(
            &self.subscription,
            &consumer.name,
            group.total_messages,
            group.total_bytes,
        );
        if !group.is_boundary() {
            self.rate_limiter.record_dispatched(
                u64::from(group.total_messages),
                group.total_bytes,
                Instant::now(),
            );
        }
        debug!(
            consumer_id,
            entries = group.entries.len(),
            messages = group.total_messages,
            "Entries sent"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConsumer, MockCursor};
    use crate::rate_limiter::{FixedWindowRateLimiter, UnlimitedRateLimiter};
    use crate::redelivery::InMemoryRedeliveryTracker;
    use contracts::MessageMetadata;
    use protocol::{markers, serialize_metadata_and_payload};
    use selector::sticky_key_hash;

    type TestDispatcher =
        StickyKeyDispatcher<MockCursor, InMemoryRedeliveryTracker, UnlimitedRateLimiter>;

    fn dispatcher() -> (TestDispatcher, MockCursor) {
        let cursor = MockCursor::new("sub");
        let dispatcher = StickyKeyDispatcher::new(
            "persistent://public/default/t:sub",
            &DispatcherConfig::default(),
            cursor.clone(),
            InMemoryRedeliveryTracker::default(),
            UnlimitedRateLimiter,
        );
        (dispatcher, cursor)
    }

    fn message(entry_id: u64, key: &str) -> LogEntry {
        let metadata = MessageMetadata::new("producer", entry_id).with_partition_key(key);
        let data = serialize_metadata_and_payload(&metadata, b"payload").unwrap();
        LogEntry::new(1, entry_id, data)
    }

    fn marker(entry_id: u64) -> LogEntry {
        let data = markers::new_replicated_subscriptions_snapshot_request("snap", "east").unwrap();
        LogEntry::new(1, entry_id, data)
    }

    fn attach<C, R, L>(
        dispatcher: &mut StickyKeyDispatcher<C, R, L>,
        name: &str,
        permits: u32,
    ) -> (ConsumerId, MockConsumer)
    where
        C: ManagedCursor,
        R: RedeliveryTracker,
        L: DispatchRateLimiter,
    {
        let consumer = MockConsumer::new(name);
        let id = dispatcher.add_consumer(consumer.registration()).unwrap();
        if permits > 0 {
            dispatcher.consumer_flow(id, permits).unwrap();
        }
        (id, consumer)
    }

    /// Key owned by `consumer` on the dispatcher's ring
    fn key_for<C, R, L>(dispatcher: &StickyKeyDispatcher<C, R, L>, consumer: ConsumerId) -> String
    where
        C: ManagedCursor,
        R: RedeliveryTracker,
        L: DispatchRateLimiter,
    {
        (0..)
            .map(|i| format!("key-{i}"))
            .find(|key| dispatcher.selector().select(key.as_bytes()) == Ok(consumer))
            .unwrap()
    }

    #[test]
    fn test_leading_marker_then_payloads() {
        let (mut dispatcher, cursor) = dispatcher();
        let (_, consumer) = attach(&mut dispatcher, "c1", 1000);
        assert_eq!(cursor.last_read(), Some(100));
        assert_eq!(
            dispatcher.state(),
            DispatcherState::ReadPending(ReadType::Normal)
        );

        let mut entries = vec![marker(1)];
        entries.extend((2..=6).map(|i| message(i, "k")));
        dispatcher.read_entries_complete(entries, ReadType::Normal);

        assert_eq!(consumer.send_sizes(), vec![0, 5]);
        assert_eq!(cursor.requests().acknowledged, vec![Position::new(1, 1)]);
        assert_eq!(dispatcher.available_permits(1), Some(995));
        assert_eq!(cursor.requests().reads.len(), 2);
        assert_eq!(dispatcher.metrics().markers_acknowledged(), 1);
    }

    #[test]
    fn test_marker_then_two_messages() {
        let (mut dispatcher, _cursor) = dispatcher();
        let (_, consumer) = attach(&mut dispatcher, "c1", 1000);
        dispatcher.read_entries_complete(
            vec![marker(1), message(2, "a"), message(3, "a")],
            ReadType::Normal,
        );
        assert_eq!(consumer.send_sizes(), vec![0, 2]);
    }

    #[test]
    fn test_add_consumer_rejects_duplicates_and_closed() {
        let (mut dispatcher, _cursor) = dispatcher();
        attach(&mut dispatcher, "c1", 0);
        let err = dispatcher
            .add_consumer(MockConsumer::new("c1").registration())
            .unwrap_err();
        assert!(matches!(err, DispatcherError::ConsumerAlreadyAttached(name) if name == "c1"));

        dispatcher.close();
        let err = dispatcher
            .add_consumer(MockConsumer::new("c2").registration())
            .unwrap_err();
        assert!(matches!(err, DispatcherError::Closed));
    }

    #[test]
    fn test_unknown_consumer_operations() {
        let (mut dispatcher, _cursor) = dispatcher();
        assert!(matches!(
            dispatcher.consumer_flow(7, 10),
            Err(DispatcherError::UnknownConsumer(7))
        ));
        assert!(dispatcher.remove_consumer(7).is_err());
        assert!(dispatcher.acknowledge(7, &[]).is_err());
        assert_eq!(dispatcher.available_permits(7), None);
    }

    #[test]
    fn test_no_permits_blocks_until_flow() {
        let (mut dispatcher, cursor) = dispatcher();
        let (id, _) = attach(&mut dispatcher, "c1", 0);
        assert_eq!(dispatcher.state(), DispatcherState::Blocked);
        assert!(cursor.requests().reads.is_empty());

        dispatcher.entries_available();
        assert!(cursor.requests().reads.is_empty());

        dispatcher.consumer_flow(id, 10).unwrap();
        assert_eq!(cursor.last_read(), Some(10));
        assert_eq!(
            dispatcher.state(),
            DispatcherState::ReadPending(ReadType::Normal)
        );
    }

    #[test]
    fn test_read_size_follows_smallest_consumer() {
        let (mut dispatcher, cursor) = dispatcher();
        attach(&mut dispatcher, "c1", 50);
        dispatcher.read_entries_complete(Vec::new(), ReadType::Normal);
        let (c2, _) = attach(&mut dispatcher, "c2", 0);
        assert_eq!(cursor.last_read(), Some(50));
        dispatcher.read_entries_complete(Vec::new(), ReadType::Normal);

        dispatcher.consumer_flow(c2, 8).unwrap();
        assert_eq!(cursor.last_read(), Some(8));
    }

    #[test]
    fn test_backpressure_then_replay() {
        let (mut dispatcher, cursor) = dispatcher();
        let (id, consumer) = attach(&mut dispatcher, "c1", 3);
        assert_eq!(cursor.last_read(), Some(3));

        dispatcher.read_entries_complete((1..=5).map(|i| message(i, "k")).collect(), ReadType::Normal);
        assert_eq!(consumer.send_sizes(), vec![3]);
        assert_eq!(dispatcher.redelivery().len(), 2);
        assert_eq!(dispatcher.state(), DispatcherState::Blocked);

        dispatcher.consumer_flow(id, 5).unwrap();
        assert_eq!(
            cursor.last_replay(),
            Some(vec![Position::new(1, 4), Position::new(1, 5)])
        );

        dispatcher.read_entries_complete(vec![message(4, "k"), message(5, "k")], ReadType::Replay);
        assert_eq!(consumer.send_sizes(), vec![3, 2]);
        assert!(dispatcher.redelivery().is_empty());
        assert_eq!(
            consumer.delivered_positions(),
            (1..=5).map(|i| Position::new(1, i)).collect::<Vec<_>>()
        );
        assert_eq!(consumer.sends()[1].redelivery_counts, vec![0, 0]);
    }

    #[test]
    fn test_keys_pending_redelivery_wait_for_replay() {
        let (mut dispatcher, cursor) = dispatcher();
        let (id, consumer) = attach(&mut dispatcher, "c1", 1);

        dispatcher.read_entries_complete(vec![message(1, "k"), message(2, "k")], ReadType::Normal);
        assert_eq!(consumer.delivered_positions(), vec![Position::new(1, 1)]);
        assert_eq!(dispatcher.state(), DispatcherState::Blocked);

        dispatcher.consumer_flow(id, 1).unwrap();
        assert_eq!(cursor.last_replay(), Some(vec![Position::new(1, 2)]));
        dispatcher.read_entries_complete(vec![message(2, "k")], ReadType::Replay);
        assert_eq!(
            consumer.delivered_positions(),
            vec![Position::new(1, 1), Position::new(1, 2)]
        );

        dispatcher.consumer_flow(id, 1).unwrap();
        dispatcher.read_entries_complete(vec![message(3, "k")], ReadType::Normal);
        assert_eq!(consumer.delivered_positions().len(), 3);
    }

    #[test]
    fn test_first_delivery_after_hold_back_counts_zero() {
        let (mut dispatcher, _cursor) = dispatcher();
        let (id, consumer) = attach(&mut dispatcher, "c1", 1);
        dispatcher.read_entries_complete(vec![message(1, "k"), message(2, "k")], ReadType::Normal);
        assert_eq!(dispatcher.redelivery().redelivery_count(Position::new(1, 2)), 0);

        dispatcher.consumer_flow(id, 1).unwrap();
        dispatcher.read_entries_complete(vec![message(2, "k")], ReadType::Replay);
        let sends = consumer.sends();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[1].entries[0].position, Position::new(1, 2));
        assert_eq!(sends[1].redelivery_counts, vec![0]);
    }

    #[test]
    fn test_send_failure_isolated_to_consumer() {
        let (mut dispatcher, _cursor) = dispatcher();
        let (healthy_id, healthy) = attach(&mut dispatcher, "healthy", 1000);
        let (broken_id, broken) = attach(&mut dispatcher, "broken", 1000);
        broken.set_failing(true);

        let healthy_key = key_for(&dispatcher, healthy_id);
        let broken_key = key_for(&dispatcher, broken_id);
        dispatcher.read_entries_complete(
            vec![message(1, &broken_key), message(2, &healthy_key), message(3, &broken_key)],
            ReadType::Normal,
        );

        assert_eq!(healthy.delivered_positions(), vec![Position::new(1, 2)]);
        assert_eq!(dispatcher.consumer_count(), 1);
        assert_eq!(dispatcher.metrics().send_failures(), 1);
        assert_eq!(
            dispatcher.redelivery().next_positions(10),
            vec![Position::new(1, 1), Position::new(1, 3)]
        );
        assert_eq!(
            dispatcher.state(),
            DispatcherState::ReadPending(ReadType::Replay)
        );

        dispatcher.read_entries_complete(
            vec![message(1, &broken_key), message(3, &broken_key)],
            ReadType::Replay,
        );
        assert_eq!(
            healthy.delivered_positions(),
            vec![Position::new(1, 2), Position::new(1, 1), Position::new(1, 3)]
        );
    }

    #[test]
    fn test_detach_requeues_unacked() {
        let (mut dispatcher, cursor) = dispatcher();
        let (id, consumer) = attach(&mut dispatcher, "c1", 100);
        dispatcher.read_entries_complete((1..=4).map(|i| message(i, "k")).collect(), ReadType::Normal);
        assert_eq!(consumer.delivered_positions().len(), 4);

        dispatcher
            .acknowledge(id, &[Position::new(1, 1)])
            .unwrap();
        assert_eq!(cursor.requests().acknowledged, vec![Position::new(1, 1)]);

        dispatcher.remove_consumer(id).unwrap();
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        assert_eq!(
            dispatcher.redelivery().next_positions(10),
            vec![Position::new(1, 2), Position::new(1, 3), Position::new(1, 4)]
        );
        assert!(dispatcher
            .redelivery()
            .contains_sticky_key_hash(sticky_key_hash(b"k")));
    }

    #[test]
    fn test_last_consumer_leaves_during_read() {
        let (mut dispatcher, cursor) = dispatcher();
        let (id, consumer) = attach(&mut dispatcher, "c1", 100);
        dispatcher.remove_consumer(id).unwrap();
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        assert_eq!(dispatcher.pending_read(), Some(ReadType::Normal));

        dispatcher.read_entries_complete(vec![message(1, "a"), marker(2)], ReadType::Normal);
        assert!(consumer.sends().is_empty());
        assert_eq!(dispatcher.redelivery().len(), 1);
        assert_eq!(cursor.requests().acknowledged, vec![Position::new(1, 2)]);

        let (_, next) = attach(&mut dispatcher, "c2", 100);
        assert_eq!(cursor.last_replay(), Some(vec![Position::new(1, 1)]));
        dispatcher.read_entries_complete(vec![message(1, "a")], ReadType::Replay);
        assert_eq!(next.delivered_positions(), vec![Position::new(1, 1)]);
    }

    #[test]
    fn test_single_outstanding_read() {
        let (mut dispatcher, cursor) = dispatcher();
        let (id, _) = attach(&mut dispatcher, "c1", 100);
        dispatcher.consumer_flow(id, 100).unwrap();
        dispatcher.entries_available();
        let (_, _) = attach(&mut dispatcher, "c2", 100);
        assert_eq!(cursor.requests().reads.len(), 1);
    }

    #[test]
    fn test_close_discards_completion() {
        let (mut dispatcher, cursor) = dispatcher();
        let (_, consumer) = attach(&mut dispatcher, "c1", 100);
        dispatcher.close();

        dispatcher.read_entries_complete(vec![marker(1), message(2, "k")], ReadType::Normal);
        assert!(consumer.sends().is_empty());
        assert!(cursor.requests().acknowledged.is_empty());
        assert_eq!(dispatcher.state(), DispatcherState::Closed);
        assert_eq!(dispatcher.pending_read(), None);
        assert_eq!(cursor.requests().reads.len(), 1);
    }

    #[test]
    fn test_read_failure_backs_off() {
        let (mut dispatcher, cursor) = dispatcher();
        attach(&mut dispatcher, "c1", 100);
        dispatcher.read_entries_failed(ContractError::log_read("sub", "timeout"), ReadType::Normal);

        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        assert_eq!(dispatcher.pending_read(), None);
        assert!(dispatcher.next_read_at().is_some());

        dispatcher.entries_available();
        assert_eq!(cursor.requests().reads.len(), 1);
    }

    #[test]
    fn test_unwritable_consumer_receives_nothing() {
        let (mut dispatcher, cursor) = dispatcher();
        let (_, consumer) = attach(&mut dispatcher, "c1", 100);
        consumer.set_writable(false);
        dispatcher.read_entries_complete(vec![message(1, "k")], ReadType::Normal);

        assert!(consumer.sends().is_empty());
        assert_eq!(dispatcher.redelivery().len(), 1);
        assert_eq!(dispatcher.state(), DispatcherState::Blocked);
        assert_eq!(cursor.requests().reads.len(), 1);
    }

    #[test]
    fn test_redeliver_unacknowledged() {
        let (mut dispatcher, cursor) = dispatcher();
        let (id, consumer) = attach(&mut dispatcher, "c1", 100);
        dispatcher.read_entries_complete(vec![message(1, "k"), message(2, "k")], ReadType::Normal);
        dispatcher.acknowledge(id, &[Position::new(1, 1)]).unwrap();

        // a normal read is pending, the replay waits for it
        assert_eq!(dispatcher.redeliver_unacknowledged(id).unwrap(), 1);
        dispatcher.read_entries_complete(Vec::new(), ReadType::Normal);
        assert_eq!(cursor.last_replay(), Some(vec![Position::new(1, 2)]));

        dispatcher.read_entries_complete(vec![message(2, "k")], ReadType::Replay);
        let last = consumer.sends().pop().unwrap();
        assert_eq!(last.redelivery_counts, vec![1]);
        assert_eq!(last.entries[0].position, Position::new(1, 2));
    }

    #[test]
    fn test_rate_limit_caps_and_throttles_reads() {
        let cursor = MockCursor::new("sub");
        let mut dispatcher = StickyKeyDispatcher::new(
            "sub",
            &DispatcherConfig::default(),
            cursor.clone(),
            InMemoryRedeliveryTracker::default(),
            FixedWindowRateLimiter::new(Some(2), None, Duration::from_secs(60)),
        );
        let (_, consumer) = attach(&mut dispatcher, "c1", 100);
        assert_eq!(cursor.last_read(), Some(2));

        dispatcher.read_entries_complete(vec![message(1, "k"), message(2, "k")], ReadType::Normal);
        assert_eq!(consumer.send_sizes(), vec![2]);
        assert_eq!(cursor.requests().reads.len(), 1);
        assert!(dispatcher.next_read_at().is_some());
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
    }
}
