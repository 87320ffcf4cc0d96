//! Time source abstraction.
//!
//! Cache TTLs and region expiry are defined against wall-clock timestamps.
//! Components take an `Arc<dyn Clock>` instead of calling `Utc::now()`
//! directly so that expiry behavior can be tested without sleeping.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Wall-clock time source.
///
/// All timestamp reads in the library go through this trait. Production code
/// uses [`SystemClock`]; tests use [`ManualClock`] to step time forward
/// deterministically.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as Unix seconds.
    fn now_unix(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
///
/// Starts at the construction instant and only moves when `advance()` is
/// called, so a 7-day TTL can be crossed in a single test statement.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a manual clock starting at the current system time.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    /// Create a manual clock starting at a fixed instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(delta).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Shared clock handle used throughout the library.
pub type SharedClock = Arc<dyn Clock>;

/// Convenience constructor for the production clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_tracks_real_time() {
        let clock = SystemClock;
        let before = Utc::now().timestamp();
        let now = clock.now_unix();
        let after = Utc::now().timestamp();
        assert!(now >= before && now <= after);
    }

    #[test]
    fn manual_clock_is_frozen_until_advanced() {
        let clock = ManualClock::new();
        let first = clock.now();
        let second = clock.now();
        assert_eq!(first, second);
    }

    #[test]
    fn manual_clock_advance() {
        let clock = ManualClock::new();
        let start = clock.now_unix();

        clock.advance(Duration::from_secs(7 * 24 * 3600));

        assert_eq!(clock.now_unix(), start + 7 * 24 * 3600);
    }

    #[test]
    fn manual_clock_trait_object() {
        let clock: SharedClock = Arc::new(ManualClock::new());
        let t0 = clock.now_unix();
        assert!(t0 > 0);
    }
}
