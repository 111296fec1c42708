//! Reconnect backoff policy.
//!
//! Both supervision loops (device and caster) share this policy: exponential
//! delay growth from a base up to a cap, reset to the base once a connection
//! has streamed long enough to count as healthy. Modeled as an explicit
//! state holder with pure delay computation rather than sleeps buried in a
//! retry loop, so the schedule is testable without a clock.

use std::time::Duration;

/// Default first-retry delay.
pub const DEFAULT_BASE: Duration = Duration::from_secs(5);
/// Default delay ceiling.
pub const DEFAULT_CAP: Duration = Duration::from_secs(60);
/// Default streaming time after which the failure count resets.
pub const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(300);

/// Exponential backoff state for one supervised connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    reset_after: Duration,
    consecutive_failures: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_CAP, DEFAULT_RESET_AFTER)
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, reset_after: Duration) -> Self {
        Self { base, cap, reset_after, consecutive_failures: 0 }
    }

    /// Delay for the Nth consecutive failure: `min(base * 2^(n-1), cap)`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.cap, |d| d.min(self.cap))
    }

    /// Record a failure and return the delay to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.delay_for(self.consecutive_failures)
    }

    /// Record how long the connection streamed before it failed. Sustained
    /// streaming clears the failure count so the next fault retries quickly;
    /// a short-lived connection keeps climbing the schedule, which prevents
    /// thrashing on a persistently absent peer.
    pub fn record_streaming(&mut self, streamed_for: Duration) {
        if streamed_for >= self.reset_after {
            self.consecutive_failures = 0;
        }
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
