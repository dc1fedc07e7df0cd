//! Timestamp type used in protocol messages.
//!
//! Timestamps are Unix epoch seconds (UTC). Signed statements frame them
//! as big-endian microseconds of the whole second, so sub-second precision
//! is deliberately absent here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Unix timestamp in seconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// The "never" sentinel, ordered after every real timestamp.
    pub fn never() -> Self {
        Self(u64::MAX)
    }

    pub fn is_never(&self) -> bool {
        self.0 == u64::MAX
    }

    /// Get the current system time as a `Timestamp`.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs();
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Microseconds since epoch, saturating for the `never` sentinel.
    pub fn as_micros(&self) -> u64 {
        self.0.saturating_mul(1_000_000)
    }

    pub fn saturating_add_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    pub fn saturating_sub_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }

    /// Whether this timestamp + duration has passed relative to `now`.
    pub fn has_expired(&self, duration_secs: u64, now: Timestamp) -> bool {
        now.0 >= self.0.saturating_add(duration_secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "never")
        } else {
            write!(f, "{}s", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_orders_last() {
        assert!(Timestamp::never() > Timestamp::new(u64::MAX - 1));
        assert!(Timestamp::never().is_never());
        assert!(!Timestamp::new(0).is_never());
    }

    #[test]
    fn micros_saturate() {
        assert_eq!(Timestamp::new(3).as_micros(), 3_000_000);
        assert_eq!(Timestamp::never().as_micros(), u64::MAX);
    }

    #[test]
    fn expiry() {
        let t = Timestamp::new(100);
        assert!(t.has_expired(50, Timestamp::new(150)));
        assert!(!t.has_expired(50, Timestamp::new(149)));
    }
}
