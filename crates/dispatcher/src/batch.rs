//! Batch building: one read completion into per-consumer sends
//!
//! Entries are classified, routed by sticky key and grouped per consumer
//! within marker-delimited segments. The builder only plans; the dispatcher
//! performs the sends and applies the side effects.

use std::collections::{BTreeSet, HashMap, HashSet};

use contracts::{
    ConsumerId, EntryBatchSizes, LogEntry, MarkerType, ParsedEntry, Position, ReadType,
    RedeliveryEntry, RedeliveryTracker,
};
use selector::{sticky_key_hash, StickyKeyConsumerSelector};
use tracing::trace;

use crate::flow::FlowController;
use crate::DispatcherError;

/// One planned send
#[derive(Debug, Clone, Default)]
pub struct SendGroup {
    pub consumer: ConsumerId,
    /// Entries in log order; empty for a marker boundary send
    pub entries: Vec<LogEntry>,
    pub batch_sizes: EntryBatchSizes,
    /// Sticky key hash of each entry
    pub sticky_key_hashes: Vec<u32>,
    pub total_messages: u32,
    pub total_bytes: u64,
}

impl SendGroup {
    fn new(consumer: ConsumerId) -> Self {
        Self {
            consumer,
            ..Default::default()
        }
    }

    fn push(&mut self, entry: LogEntry, num_messages: u32, hash: u32) {
        self.total_bytes += entry.len() as u64;
        self.total_messages += num_messages;
        self.batch_sizes.push(num_messages);
        self.sticky_key_hashes.push(hash);
        self.entries.push(entry);
    }

    /// Zero-message send forced by a marker
    pub fn is_boundary(&self) -> bool {
        self.entries.is_empty()
    }

    /// Redelivery hand-offs for every entry of this group
    pub fn into_redelivery(self) -> Vec<RedeliveryEntry> {
        let consumer = self.consumer;
        self.entries
            .into_iter()
            .zip(self.sticky_key_hashes)
            .map(|(entry, hash)| {
                RedeliveryEntry::new(entry.position)
                    .with_consumer(consumer)
                    .with_sticky_key_hash(hash)
            })
            .collect()
    }
}

/// Outcome of building one read completion
#[derive(Debug, Default)]
pub struct DispatchPlan {
    /// Sends in dispatch order
    pub groups: Vec<SendGroup>,
    /// Marker and malformed positions to acknowledge
    pub acknowledged: Vec<Position>,
    /// Entries that could not be sent now
    pub redeliver: Vec<RedeliveryEntry>,
    /// Entries ignored because their redelivery state says so
    pub skipped: Vec<Position>,
    pub markers: Vec<(Position, MarkerType)>,
    /// Decode failures; their positions are also in `acknowledged`
    pub malformed: Vec<DispatcherError>,
    /// Set when the ring had no consumer for some entry
    pub unroutable: Option<DispatcherError>,
}

impl DispatchPlan {
    /// Logical messages across all groups
    pub fn total_messages(&self) -> u64 {
        self.groups.iter().map(|g| u64::from(g.total_messages)).sum()
    }
}

/// Builds a [`DispatchPlan`] against a view of the current consumer state
pub struct BatchBuilder<'a, S: ?Sized, R: ?Sized> {
    read_type: ReadType,
    selector: &'a S,
    flow: &'a FlowController,
    writable: &'a BTreeSet<ConsumerId>,
    tracker: &'a R,
}

/// Per-consumer open groups of the current marker segment
#[derive(Default)]
struct Segment {
    groups: Vec<SendGroup>,
    index: HashMap<ConsumerId, usize>,
}

impl Segment {
    fn push(&mut self, consumer: ConsumerId, entry: LogEntry, num_messages: u32, hash: u32) {
        let slot = *self.index.entry(consumer).or_insert_with(|| {
            self.groups.push(SendGroup::new(consumer));
            self.groups.len() - 1
        });
        self.groups[slot].push(entry, num_messages, hash);
    }

    fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn flush_into(&mut self, out: &mut Vec<SendGroup>) {
        self.index.clear();
        out.append(&mut self.groups);
    }
}

impl<'a, S, R> BatchBuilder<'a, S, R>
where
    S: StickyKeyConsumerSelector + ?Sized,
    R: RedeliveryTracker + ?Sized,
{
    pub fn new(
        read_type: ReadType,
        selector: &'a S,
        flow: &'a FlowController,
        writable: &'a BTreeSet<ConsumerId>,
        tracker: &'a R,
    ) -> Self {
        Self {
            read_type,
            selector,
            flow,
            writable,
            tracker,
        }
    }

    pub fn build(self, entries: Vec<LogEntry>) -> DispatchPlan {
        let mut plan = DispatchPlan::default();
        let mut segment = Segment::default();
        let mut reserved: HashMap<ConsumerId, u32> = HashMap::new();
        let mut exhausted: HashSet<ConsumerId> = HashSet::new();

        for entry in entries {
            let position = entry.position;
            let parsed = match protocol::parse_entry(&entry) {
                Ok(parsed) => parsed,
                Err(e) => {
                    plan.malformed.push(DispatcherError::MalformedEntry {
                        position,
                        message: e.to_string(),
                    });
                    plan.acknowledged.push(position);
                    continue;
                }
            };

            let metadata = match parsed {
                ParsedEntry::Marker { kind, .. } => {
                    trace!(position = %position, marker = kind.as_str(), "Marker entry");
                    plan.markers.push((position, kind));
                    plan.acknowledged.push(position);
                    if segment.is_empty() {
                        if let Some(consumer) = self.boundary_consumer() {
                            plan.groups.push(SendGroup::new(consumer));
                        }
                    } else {
                        segment.flush_into(&mut plan.groups);
                    }
                    continue;
                }
                ParsedEntry::Payload { metadata, .. } => metadata,
            };

            let scheduled = self.tracker.is_scheduled_for_redelivery(position);
            match self.read_type {
                // already acked or sent elsewhere since the replay was requested
                ReadType::Replay if !scheduled => {
                    plan.skipped.push(position);
                    continue;
                }
                ReadType::Normal if scheduled => {
                    plan.skipped.push(position);
                    continue;
                }
                _ => {}
            }

            let hash = sticky_key_hash(protocol::sticky_key(&metadata));
            let num_messages = metadata.num_messages();

            if self.read_type == ReadType::Normal && self.tracker.contains_sticky_key_hash(hash) {
                plan.redeliver
                    .push(RedeliveryEntry::new(position).with_sticky_key_hash(hash));
                continue;
            }

            let consumer = match self.selector.select_by_hash(hash) {
                Ok(consumer) => consumer,
                Err(e) => {
                    plan.unroutable.get_or_insert_with(|| e.into());
                    plan.redeliver
                        .push(RedeliveryEntry::new(position).with_sticky_key_hash(hash));
                    continue;
                }
            };

            let pending = reserved.get(&consumer).copied().unwrap_or(0);
            let fits = !exhausted.contains(&consumer)
                && self.flow.can_send(
                    consumer,
                    pending.saturating_add(num_messages),
                    self.writable.contains(&consumer),
                );
            if !fits {
                exhausted.insert(consumer);
                plan.redeliver.push(
                    RedeliveryEntry::new(position)
                        .with_consumer(consumer)
                        .with_sticky_key_hash(hash),
                );
                continue;
            }

            reserved.insert(consumer, pending + num_messages);
            segment.push(consumer, entry, num_messages, hash);
        }

        segment.flush_into(&mut plan.groups);
        plan
    }

    /// Writable consumer owning the keyless route
    fn boundary_consumer(&self) -> Option<ConsumerId> {
        self.selector
            .select(protocol::NONE_KEY)
            .ok()
            .filter(|consumer| self.writable.contains(consumer))
    }
}
