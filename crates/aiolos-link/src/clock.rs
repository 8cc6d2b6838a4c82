//! Monotonic time source.
//!
//! Every timeout in this crate is a deadline computed from [`Clock::now`]
//! and checked in a loop; nothing calls `std::thread::sleep` directly.
//! Backed by `quanta`. A mock clock turns [`Clock::sleep`] into a jump of
//! virtual time, so multi-minute recovery paths run instantly in tests and
//! in simulation mode.

use std::sync::Arc;
use std::time::Duration;

use quanta::{Instant, Mock};

/// Cloneable handle to either the real monotonic clock or a shared mock.
#[derive(Clone)]
pub struct Clock {
    inner: quanta::Clock,
    mock: Option<Arc<Mock>>,
}

impl Clock {
    /// Real monotonic clock.
    pub fn new() -> Self {
        Clock {
            inner: quanta::Clock::new(),
            mock: None,
        }
    }

    /// Virtual clock starting at zero. The returned [`Mock`] can be used to
    /// advance time from outside the code under test.
    pub fn mock() -> (Self, Arc<Mock>) {
        let (inner, mock) = quanta::Clock::mock();
        (
            Clock {
                inner,
                mock: Some(mock.clone()),
            },
            mock,
        )
    }

    pub fn now(&self) -> Instant {
        self.inner.now()
    }

    pub fn is_virtual(&self) -> bool {
        self.mock.is_some()
    }

    /// Block for `duration`, or advance virtual time by it.
    pub fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        match &self.mock {
            Some(mock) => mock.increment(duration),
            None => std::thread::sleep(duration),
        }
    }

    /// Time elapsed since `earlier`, saturating at zero.
    pub fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }

    pub fn deadline(&self, timeout: Duration) -> Deadline {
        Deadline {
            at: self.now() + timeout,
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("virtual", &self.is_virtual())
            .finish()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute point in time after which an operation gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn expired(&self, clock: &Clock) -> bool {
        clock.now() >= self.at
    }

    pub fn remaining(&self, clock: &Clock) -> Duration {
        self.at.saturating_duration_since(clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_sleep_advances_virtual_time() {
        let (clock, _mock) = Clock::mock();
        let start = clock.now();
        clock.sleep(Duration::from_secs(8));
        assert_eq!(clock.since(start), Duration::from_secs(8));
    }

    #[test]
    fn external_mock_increment_is_visible() {
        let (clock, mock) = Clock::mock();
        let start = clock.now();
        mock.increment(Duration::from_millis(1500));
        assert_eq!(clock.since(start), Duration::from_millis(1500));
    }

    #[test]
    fn deadline_expires_after_timeout() {
        let (clock, _mock) = Clock::mock();
        let deadline = clock.deadline(Duration::from_secs(3));
        assert!(!deadline.expired(&clock));
        clock.sleep(Duration::from_millis(2999));
        assert!(!deadline.expired(&clock));
        assert_eq!(deadline.remaining(&clock), Duration::from_millis(1));
        clock.sleep(Duration::from_millis(1));
        assert!(deadline.expired(&clock));
        assert_eq!(deadline.remaining(&clock), Duration::ZERO);
    }

    #[test]
    fn clones_share_the_same_mock() {
        let (clock, _mock) = Clock::mock();
        let other = clock.clone();
        let start = other.now();
        clock.sleep(Duration::from_secs(1));
        assert_eq!(other.since(start), Duration::from_secs(1));
    }
}
