//! DispatcherHandle - runs a dispatcher in its own task
//!
//! Every operation, including read completions, is an event on one mpsc
//! channel, so the dispatcher state is only ever touched by its task.

use std::sync::Arc;

use contracts::{
    ConsumerId, ConsumerRegistration, ContractError, DispatchRateLimiter, DispatcherConfig,
    LogEntry, LogReader, ManagedCursor, Position, ReadType, RedeliveryTracker,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, instrument, warn};

use crate::consumer::ConsumerInfo;
use crate::dispatcher::{DispatcherState, StickyKeyDispatcher};
use crate::error::DispatcherError;
use crate::metrics::{DispatcherMetrics, DispatcherMetricsSnapshot};

/// Events processed by the dispatcher task
pub enum DispatcherEvent {
    AddConsumer {
        registration: ConsumerRegistration,
        reply: oneshot::Sender<Result<ConsumerId, DispatcherError>>,
    },
    RemoveConsumer {
        consumer_id: ConsumerId,
        reply: oneshot::Sender<Result<(), DispatcherError>>,
    },
    Flow {
        consumer_id: ConsumerId,
        permits: u32,
    },
    Ack {
        consumer_id: ConsumerId,
        positions: Vec<Position>,
    },
    RedeliverUnacknowledged {
        consumer_id: ConsumerId,
    },
    ReadComplete {
        entries: Vec<LogEntry>,
        read_type: ReadType,
    },
    ReadFailed {
        error: ContractError,
        read_type: ReadType,
    },
    EntriesAvailable,
    Status {
        reply: oneshot::Sender<DispatcherStatus>,
    },
    Close,
}

/// Point-in-time view of a running dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherStatus {
    pub state: DispatcherState,
    pub consumers: Vec<ConsumerInfo>,
    pub redelivery_backlog: usize,
    pub metrics: DispatcherMetricsSnapshot,
}

/// Cursor backed by an async [`LogReader`]
///
/// Each request runs in its own task and posts its outcome back to the
/// dispatcher's event channel. The weak sender lets the channel close once
/// every client is gone.
pub struct ReaderCursor<R> {
    name: String,
    reader: Arc<R>,
    events: mpsc::WeakSender<DispatcherEvent>,
}

impl<R> ReaderCursor<R> {
    pub fn new(
        name: impl Into<String>,
        reader: Arc<R>,
        events: mpsc::WeakSender<DispatcherEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            reader,
            events,
        }
    }
}

impl<R> ManagedCursor for ReaderCursor<R>
where
    R: LogReader + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn request_read(&mut self, max_entries: usize) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let reader = Arc::clone(&self.reader);
        tokio::spawn(async move {
            let event = match reader.read_entries(max_entries).await {
                Ok(entries) => DispatcherEvent::ReadComplete {
                    entries,
                    read_type: ReadType::Normal,
                },
                Err(error) => DispatcherEvent::ReadFailed {
                    error,
                    read_type: ReadType::Normal,
                },
            };
            if events.send(event).await.is_err() {
                debug!("Dispatcher gone, read completion dropped");
            }
        });
    }

    fn request_replay(&mut self, positions: Vec<Position>) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let reader = Arc::clone(&self.reader);
        tokio::spawn(async move {
            let event = match reader.replay_entries(positions).await {
                Ok(entries) => DispatcherEvent::ReadComplete {
                    entries,
                    read_type: ReadType::Replay,
                },
                Err(error) => DispatcherEvent::ReadFailed {
                    error,
                    read_type: ReadType::Replay,
                },
            };
            if events.send(event).await.is_err() {
                debug!("Dispatcher gone, replay completion dropped");
            }
        });
    }

    fn acknowledge(&mut self, positions: &[Position]) {
        let reader = Arc::clone(&self.reader);
        let positions = positions.to_vec();
        let cursor = self.name.clone();
        tokio::spawn(async move {
            if let Err(e) = reader.acknowledge(positions).await {
                error!(cursor = %cursor, error = %e, "Acknowledge failed");
            }
        });
    }
}

/// Cloneable client of a running dispatcher
#[derive(Clone)]
pub struct DispatcherClient {
    tx: mpsc::Sender<DispatcherEvent>,
}

impl DispatcherClient {
    async fn send(&self, event: DispatcherEvent) -> Result<(), DispatcherError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| DispatcherError::ChannelClosed)
    }

    pub async fn add_consumer(
        &self,
        registration: ConsumerRegistration,
    ) -> Result<ConsumerId, DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatcherEvent::AddConsumer {
            registration,
            reply,
        })
        .await?;
        rx.await.map_err(|_| DispatcherError::ChannelClosed)?
    }

    pub async fn remove_consumer(&self, consumer_id: ConsumerId) -> Result<(), DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatcherEvent::RemoveConsumer { consumer_id, reply })
            .await?;
        rx.await.map_err(|_| DispatcherError::ChannelClosed)?
    }

    pub async fn flow(&self, consumer_id: ConsumerId, permits: u32) -> Result<(), DispatcherError> {
        self.send(DispatcherEvent::Flow {
            consumer_id,
            permits,
        })
        .await
    }

    pub async fn acknowledge(
        &self,
        consumer_id: ConsumerId,
        positions: Vec<Position>,
    ) -> Result<(), DispatcherError> {
        self.send(DispatcherEvent::Ack {
            consumer_id,
            positions,
        })
        .await
    }

    pub async fn redeliver_unacknowledged(
        &self,
        consumer_id: ConsumerId,
    ) -> Result<(), DispatcherError> {
        self.send(DispatcherEvent::RedeliverUnacknowledged { consumer_id })
            .await
    }

    /// Tell the dispatcher new entries were appended
    pub async fn entries_available(&self) -> Result<(), DispatcherError> {
        self.send(DispatcherEvent::EntriesAvailable).await
    }

    pub async fn status(&self) -> Result<DispatcherStatus, DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatcherEvent::Status { reply }).await?;
        rx.await.map_err(|_| DispatcherError::ChannelClosed)
    }
}

/// Handle to a running dispatcher task
pub struct DispatcherHandle {
    subscription: String,
    client: DispatcherClient,
    metrics: Arc<DispatcherMetrics>,
    worker_handle: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Build a dispatcher over `reader` and spawn its task
    pub fn spawn<R, T, L>(
        subscription: impl Into<String>,
        config: &DispatcherConfig,
        reader: Arc<R>,
        tracker: T,
        rate_limiter: L,
    ) -> Self
    where
        R: LogReader + Send + Sync + 'static,
        T: RedeliveryTracker + 'static,
        L: DispatchRateLimiter + 'static,
    {
        let subscription = subscription.into();
        reader.rewind();
        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let cursor = ReaderCursor::new(subscription.clone(), reader, tx.downgrade());
        let dispatcher =
            StickyKeyDispatcher::new(subscription.clone(), config, cursor, tracker, rate_limiter);
        let metrics = Arc::clone(dispatcher.metrics());

        let worker_handle = tokio::spawn(async move {
            dispatcher_worker(dispatcher, rx).await;
        });

        Self {
            subscription,
            client: DispatcherClient { tx },
            metrics,
            worker_handle,
        }
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn client(&self) -> DispatcherClient {
        self.client.clone()
    }

    pub fn metrics(&self) -> &Arc<DispatcherMetrics> {
        &self.metrics
    }

    /// Close the dispatcher and wait for its task
    #[instrument(name = "dispatcher_handle_shutdown", skip(self), fields(subscription = %self.subscription))]
    pub async fn shutdown(self) {
        if self.client.send(DispatcherEvent::Close).await.is_err() {
            warn!("Dispatcher task already stopped");
        }
        drop(self.client);
        if let Err(e) = self.worker_handle.await {
            error!(error = ?e, "Dispatcher task panicked");
        }
        debug!("DispatcherHandle shutdown complete");
    }
}

/// Task owning the dispatcher
#[instrument(
    name = "dispatcher_worker_loop",
    skip(dispatcher, rx),
    fields(subscription = %dispatcher.subscription())
)]
async fn dispatcher_worker<C, T, L>(
    mut dispatcher: StickyKeyDispatcher<C, T, L>,
    mut rx: mpsc::Receiver<DispatcherEvent>,
) where
    C: ManagedCursor,
    T: RedeliveryTracker,
    L: DispatchRateLimiter,
{
    debug!("Dispatcher worker started");

    loop {
        let event = match dispatcher.next_read_at() {
            Some(at) => {
                tokio::select! {
                    event = rx.recv() => event,
                    _ = sleep_until(Instant::from_std(at)) => {
                        dispatcher.read_more_entries();
                        continue;
                    }
                }
            }
            None => rx.recv().await,
        };
        let Some(event) = event else {
            break;
        };

        match event {
            DispatcherEvent::AddConsumer {
                registration,
                reply,
            } => {
                let _ = reply.send(dispatcher.add_consumer(registration));
            }
            DispatcherEvent::RemoveConsumer { consumer_id, reply } => {
                let _ = reply.send(dispatcher.remove_consumer(consumer_id));
            }
            DispatcherEvent::Flow {
                consumer_id,
                permits,
            } => {
                if let Err(e) = dispatcher.consumer_flow(consumer_id, permits) {
                    warn!(consumer_id, error = %e, "Flow ignored");
                }
            }
            DispatcherEvent::Ack {
                consumer_id,
                positions,
            } => {
                if let Err(e) = dispatcher.acknowledge(consumer_id, &positions) {
                    warn!(consumer_id, error = %e, "Acknowledgment ignored");
                }
            }
            DispatcherEvent::RedeliverUnacknowledged { consumer_id } => {
                if let Err(e) = dispatcher.redeliver_unacknowledged(consumer_id) {
                    warn!(consumer_id, error = %e, "Redelivery request ignored");
                }
            }
            DispatcherEvent::ReadComplete { entries, read_type } => {
                dispatcher.read_entries_complete(entries, read_type);
            }
            DispatcherEvent::ReadFailed { error, read_type } => {
                dispatcher.read_entries_failed(error, read_type);
            }
            DispatcherEvent::EntriesAvailable => dispatcher.entries_available(),
            DispatcherEvent::Status { reply } => {
                let _ = reply.send(DispatcherStatus {
                    state: dispatcher.state(),
                    consumers: dispatcher.consumers(),
                    redelivery_backlog: dispatcher.redelivery().len(),
                    metrics: dispatcher.metrics().snapshot(),
                });
            }
            DispatcherEvent::Close => {
                dispatcher.close();
                break;
            }
        }
    }

    debug!("Dispatcher worker stopped");
}
