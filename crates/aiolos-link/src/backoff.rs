//! # Exponential Backoff
//!
//! One formula, two independent instances: the supervisor tracks
//! connection-level failures, the HTTP client tracks request-level failures.
//!
//! $$\text{delay}(n) = \min(\text{base} \cdot 2^{n-1}, \text{max}), \quad n \ge 1$$

use std::time::Duration;

use quanta::Instant;

/// Immutable backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max: Duration) -> Self {
        BackoffPolicy { base, max }
    }

    /// Delay after `failures` consecutive failures. Zero failures means no delay.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

/// Mutable failure bookkeeping driven by a [`BackoffPolicy`].
///
/// Invariant: `delay() <= policy.max`, and `failures() == 0` implies
/// `delay() == 0`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
    delay: Duration,
    last_attempt: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Backoff {
            policy,
            failures: 0,
            delay: Duration::ZERO,
            last_attempt: None,
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Stamp an attempt without judging its outcome yet.
    pub fn mark_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    /// Count a failure at `now` and return the new delay.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.last_attempt = Some(now);
        self.failures = self.failures.saturating_add(1);
        self.delay = self.policy.delay(self.failures);
        self.delay
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.delay = Duration::ZERO;
    }

    /// True while a recorded failure's delay has not yet elapsed.
    pub fn is_throttled(&self, now: Instant) -> bool {
        self.failures > 0 && !self.remaining(now).is_zero()
    }

    /// Gate for the next attempt. The first attempt ever always proceeds.
    pub fn should_attempt(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.delay,
        }
    }

    /// Time left until the current delay has elapsed.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_attempt {
            None => Duration::ZERO,
            Some(last) => self
                .delay
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }
}
