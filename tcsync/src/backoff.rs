//! Reconnect delay schedule.

use crate::config::ReconnectPolicy;
use std::time::Duration;

/// Stateful walk over a [`ReconnectPolicy`].
///
/// Each call to [`Backoff::next_delay`] consumes one attempt. Delays grow by
/// the policy multiplier and are capped at `max_delay`; with a non-zero
/// `max_attempts` the schedule ends after that many attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    /// Start a fresh schedule.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Delay for a zero-based attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.policy.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.policy.initial_delay.as_secs_f64() * factor;
        let max = self.policy.max_delay;
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the schedule has no attempts left.
    pub fn is_exhausted(&self) -> bool {
        self.policy.max_attempts != 0 && self.attempts >= self.policy.max_attempts
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
