//! Dispatch rate limiters

use std::time::{Duration, Instant};

use contracts::{DispatchRateLimiter, RateDecision, RateLimitConfig};

/// Limiter for subscriptions without a configured rate
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedRateLimiter;

impl DispatchRateLimiter for UnlimitedRateLimiter {
    fn is_dispatch_needed(&self) -> bool {
        false
    }

    fn acquire(&mut self, _now: Instant) -> RateDecision {
        RateDecision::Permit { max_messages: None }
    }

    fn record_dispatched(&mut self, _messages: u64, _bytes: u64, _now: Instant) {}
}

/// Fixed-window message and byte quota
///
/// Quota is charged after sending, so a window may overshoot by the last
/// send; the next window starts from zero regardless.
#[derive(Debug, Clone)]
pub struct FixedWindowRateLimiter {
    messages_per_period: Option<u64>,
    bytes_per_period: Option<u64>,
    period: Duration,
    window_start: Option<Instant>,
    messages: u64,
    bytes: u64,
}

impl FixedWindowRateLimiter {
    pub fn new(
        messages_per_period: Option<u64>,
        bytes_per_period: Option<u64>,
        period: Duration,
    ) -> Self {
        Self {
            messages_per_period,
            bytes_per_period,
            period,
            window_start: None,
            messages: 0,
            bytes: 0,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.messages_per_period,
            config.bytes_per_period,
            Duration::from_millis(config.period_ms),
        )
    }

    fn roll_window(&mut self, now: Instant) -> Instant {
        match self.window_start {
            Some(start) if now.duration_since(start) < self.period => start,
            _ => {
                self.window_start = Some(now);
                self.messages = 0;
                self.bytes = 0;
                now
            }
        }
    }
}

impl DispatchRateLimiter for FixedWindowRateLimiter {
    fn is_dispatch_needed(&self) -> bool {
        self.messages_per_period.is_some() || self.bytes_per_period.is_some()
    }

    fn acquire(&mut self, now: Instant) -> RateDecision {
        let start = self.roll_window(now);
        let messages_exhausted = self
            .messages_per_period
            .is_some_and(|limit| self.messages >= limit);
        let bytes_exhausted = self
            .bytes_per_period
            .is_some_and(|limit| self.bytes >= limit);

        if messages_exhausted || bytes_exhausted {
            let retry_after = (start + self.period).saturating_duration_since(now);
            return RateDecision::Throttle { retry_after };
        }

        RateDecision::Permit {
            max_messages: self
                .messages_per_period
                .map(|limit| (limit - self.messages) as usize),
        }
    }

    fn record_dispatched(&mut self, messages: u64, bytes: u64, now: Instant) {
        self.roll_window(now);
        self.messages = self.messages.saturating_add(messages);
        self.bytes = self.bytes.saturating_add(bytes);
    }
}

/// Limiter selected by configuration
pub fn rate_limiter_from_config(config: Option<&RateLimitConfig>) -> Box<dyn DispatchRateLimiter> {
    match config {
        Some(config) => Box::new(FixedWindowRateLimiter::from_config(config)),
        None => Box::new(UnlimitedRateLimiter),
    }
}
