//! # Dispatcher
//!
//! Sticky-key dispatch for shared subscriptions.
//!
//! Responsibilities:
//! - Route each entry of a read to the consumer owning its sticky key
//! - Respect per-consumer permits and hand everything unsendable to redelivery
//! - Acknowledge control markers without delivering them

pub mod batch;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod handle;
pub mod metrics;
pub mod mock;
pub mod rate_limiter;
pub mod redelivery;

pub use batch::{BatchBuilder, DispatchPlan, SendGroup};
pub use consumer::ConsumerInfo;
pub use dispatcher::{DispatcherState, StickyKeyDispatcher, READ_FAILURE_BACKOFF};
pub use error::DispatcherError;
pub use flow::FlowController;
pub use handle::{DispatcherClient, DispatcherEvent, DispatcherHandle, DispatcherStatus, ReaderCursor};
pub use metrics::{DispatcherMetrics, DispatcherMetricsSnapshot};
pub use rate_limiter::{rate_limiter_from_config, FixedWindowRateLimiter, UnlimitedRateLimiter};
pub use redelivery::InMemoryRedeliveryTracker;
