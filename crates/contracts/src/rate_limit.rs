//! Dispatch rate limiter interface

use std::time::{Duration, Instant};

/// Outcome of asking the limiter before a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Read allowed, optionally capped to `max_messages`
    Permit { max_messages: Option<usize> },
    /// Quota exhausted for the current period
    Throttle { retry_after: Duration },
}

/// Optional, config-gated dispatch rate limiter.
///
/// Policy configuration lives outside the dispatch core.
pub trait DispatchRateLimiter: Send {
    /// Whether a rate limit is configured at all
    fn is_dispatch_needed(&self) -> bool;

    /// Ask for quota before issuing a read
    fn acquire(&mut self, now: Instant) -> RateDecision;

    /// Charge quota for messages that were sent
    fn record_dispatched(&mut self, messages: u64, bytes: u64, now: Instant);
}

impl DispatchRateLimiter for Box<dyn DispatchRateLimiter> {
    fn is_dispatch_needed(&self) -> bool {
        (**self).is_dispatch_needed()
    }

    fn acquire(&mut self, now: Instant) -> RateDecision {
        (**self).acquire(now)
    }

    fn record_dispatched(&mut self, messages: u64, bytes: u64, now: Instant) {
        (**self).record_dispatched(messages, bytes, now)
    }
}
