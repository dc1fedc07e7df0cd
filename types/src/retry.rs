//! Retry bookkeeping for long-running operations.
//!
//! Every durable entity that talks to the network (reserve, withdrawal
//! group, refresh group) embeds a `RetryInfo`. Failures increment the
//! counter and push `next_retry` out exponentially; a forced retry resets
//! the counter. Timestamps are in milliseconds so backoff granularity is
//! observable in tests.

use crate::params::WalletParams;
use serde::{Deserialize, Serialize};

/// The "never due" sentinel for inactive schedules.
pub const RETRY_NEVER_MS: u64 = u64::MAX;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    /// When the first attempt was made (ms since epoch).
    pub first_try_ms: u64,
    /// When the next attempt is due (ms since epoch); `RETRY_NEVER_MS`
    /// while inactive.
    pub next_retry_ms: u64,
    /// Number of failed attempts so far.
    pub retry_counter: u32,
    /// Inactive schedules stay indexable by `next_retry_ms` but never
    /// become due.
    pub active: bool,
}

impl RetryInfo {
    /// Seed a fresh schedule. An active schedule is immediately due;
    /// with `active = false` the record carries an inert sentinel.
    pub fn new(now_ms: u64, active: bool, params: &WalletParams) -> Self {
        let mut info = Self {
            first_try_ms: now_ms,
            next_retry_ms: RETRY_NEVER_MS,
            retry_counter: 0,
            active,
        };
        info.update_timeout(now_ms, params);
        if active {
            info.next_retry_ms = now_ms;
        }
        info
    }

    /// Recompute `next_retry_ms` from the current counter.
    pub fn update_timeout(&mut self, now_ms: u64, params: &WalletParams) {
        if !self.active {
            self.next_retry_ms = RETRY_NEVER_MS;
            return;
        }
        let backoff =
            params.retry_backoff_delta_ms as f64 * params.retry_backoff_base.powi(self.retry_counter as i32);
        // Saturate rather than overflow for absurd counters.
        let backoff_ms = if backoff.is_finite() && backoff >= 0.0 {
            backoff.min(u64::MAX as f64) as u64
        } else {
            RETRY_NEVER_MS
        };
        self.next_retry_ms = now_ms.saturating_add(backoff_ms);
    }

    /// Record a failed attempt.
    pub fn increment(&mut self, now_ms: u64, params: &WalletParams) {
        if !self.active {
            return;
        }
        self.retry_counter = self.retry_counter.saturating_add(1);
        self.update_timeout(now_ms, params);
    }

    /// Externally forced retry: start over immediately.
    pub fn reset(&mut self, now_ms: u64, params: &WalletParams) {
        self.active = true;
        self.retry_counter = 0;
        self.first_try_ms = now_ms;
        self.update_timeout(now_ms, params);
        self.next_retry_ms = now_ms;
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.active && now_ms >= self.next_retry_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WalletParams {
        WalletParams::defaults()
    }

    #[test]
    fn backoff_deltas_grow_by_base() {
        let p = params();
        let mut info = RetryInfo::new(0, true, &p);
        // counter 0..3 with delta 200ms and base 1.5
        info.update_timeout(0, &p);
        assert_eq!(info.next_retry_ms, 200);
        let expected = [300u64, 450, 675];
        for want in expected {
            info.increment(0, &p);
            assert_eq!(info.next_retry_ms, want, "counter {}", info.retry_counter);
        }
    }

    #[test]
    fn next_retry_strictly_increases_with_counter() {
        let p = params();
        let mut info = RetryInfo::new(0, true, &p);
        let mut last = info.next_retry_ms;
        for _ in 0..20 {
            info.increment(0, &p);
            assert!(info.next_retry_ms > last);
            last = info.next_retry_ms;
        }
    }

    #[test]
    fn inactive_never_becomes_due() {
        let p = params();
        let mut info = RetryInfo::new(0, false, &p);
        assert_eq!(info.next_retry_ms, RETRY_NEVER_MS);
        assert!(!info.is_due(u64::MAX));
        info.increment(1000, &p);
        assert_eq!(info.next_retry_ms, RETRY_NEVER_MS);
    }

    #[test]
    fn reset_clears_counter_and_is_immediately_due() {
        let p = params();
        let mut info = RetryInfo::new(0, true, &p);
        info.increment(0, &p);
        info.increment(0, &p);
        assert_eq!(info.retry_counter, 2);
        info.reset(5000, &p);
        assert_eq!(info.retry_counter, 0);
        assert!(info.is_due(5000));
    }

    #[test]
    fn fresh_schedule_is_due_and_failure_pushes_it_out() {
        let p = params();
        let mut info = RetryInfo::new(1000, true, &p);
        assert!(info.is_due(1000));
        info.increment(1000, &p);
        assert!(!info.is_due(1200));
        assert!(info.is_due(1300));
    }
}
