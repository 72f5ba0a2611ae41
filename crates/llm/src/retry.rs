//! Retry policy for transient generator failures.

use std::time::Duration;

use rand::Rng;

/// Bounded randomized exponential backoff.
///
/// Injected into the generation worker and driven by an explicit loop, so
/// retry semantics stay visible and testable. The delay for attempt `n`
/// (0-based) is uniform in `(0, min(cap, base * 2^n))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first attempt.
    pub max_attempts: usize,
    /// Backoff unit; the upper bound before the first retry.
    pub base: Duration,
    /// Ceiling on any single delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy with no waiting, for tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }

    /// Upper bound of the delay before retrying attempt `attempt`.
    pub fn max_delay(&self, attempt: usize) -> Duration {
        let exp = attempt.min(32) as u32;
        let grown = self
            .base
            .checked_mul(1u32 << exp.min(31))
            .unwrap_or(self.cap);
        grown.min(self.cap)
    }

    /// The randomized delay before retrying attempt `attempt`.
    pub fn delay(&self, attempt: usize) -> Duration {
        let bound = self.max_delay(attempt);
        if bound.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_secs_f64(rng.gen_range(0.0..bound.as_secs_f64()))
    }
}
