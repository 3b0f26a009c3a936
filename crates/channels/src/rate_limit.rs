//! Minimum-interval send rate limiter.
//!
//! A limit of N messages per minute admits a send when at least `60s / N`
//! has passed since the last successful send. Elapsed time equal to the
//! interval is admitted.

use mailmerge_core::clock::{Clock, SystemClock};
use std::time::{Duration, Instant};

const ONE_MINUTE: Duration = Duration::from_secs(60);

/// Outcome of `SendRateLimiter::check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    /// Rejected; a send becomes admissible after `retry_after`.
    Throttle { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow)
    }
}

/// Per-client send-rate state. `last_send` only moves in `record_send`.
#[derive(Debug)]
pub struct SendRateLimiter<C: Clock = SystemClock> {
    limit: Option<u32>,
    last_send: Option<Instant>,
    clock: C,
}

impl SendRateLimiter<SystemClock> {
    /// `None` or `Some(0)` disables limiting.
    pub fn new(limit: Option<u32>) -> Self {
        Self::with_clock(limit, SystemClock::new())
    }
}

impl<C: Clock> SendRateLimiter<C> {
    pub fn with_clock(limit: Option<u32>, clock: C) -> Self {
        Self {
            limit: limit.filter(|l| *l > 0),
            last_send: None,
            clock,
        }
    }

    /// Messages per minute, or `None` when unlimited.
    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn last_send(&self) -> Option<Instant> {
        self.last_send
    }

    /// Shortest gap allowed between two sends.
    pub fn min_interval(&self) -> Option<Duration> {
        self.limit.map(|limit| ONE_MINUTE / limit)
    }

    /// Decide whether a send may go out now. Does not mutate state.
    pub fn check(&self) -> RateLimitDecision {
        let (Some(interval), Some(last)) = (self.min_interval(), self.last_send) else {
            return RateLimitDecision::Allow;
        };

        let elapsed = self.clock.now().saturating_duration_since(last);
        if elapsed >= interval {
            RateLimitDecision::Allow
        } else {
            RateLimitDecision::Throttle {
                retry_after: interval - elapsed,
            }
        }
    }

    /// Stamp a successful send at the current time.
    pub fn record_send(&mut self) {
        self.last_send = Some(self.clock.now());
    }
}
