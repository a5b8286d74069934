//! Retry policy shared by every remote operation.
//!
//! One policy type describes attempt ceilings, exponential backoff, jitter
//! and the total time budget. The executor that drives it lives next to the
//! pipeline (`core_backup::retry`), but the policy itself is plain data so
//! configuration and providers can carry it without pulling in the pipeline.

use rand::Rng;
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay
    pub max_delay: Duration,
    /// Total time budget across all attempts; `None` means unbounded
    pub max_elapsed: Option<Duration>,
    /// Randomise each delay within `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_elapsed: Some(Duration::from_secs(300)),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy used for chunked uploads of large media (videos).
    pub fn for_uploads() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(90),
            max_elapsed: Some(Duration::from_secs(900)),
            jitter: true,
        }
    }

    /// Policy used for dedup lookups and folder resolution.
    pub fn for_queries() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_elapsed: Some(Duration::from_secs(300)),
            jitter: true,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_elapsed(mut self, budget: Option<Duration>) -> Self {
        self.max_elapsed = budget;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff ceiling before the retry that follows failed attempt `retry`
    /// (0-indexed): `min(base * 2^retry, max_delay)`.
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay to sleep after failed attempt `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    /// Whether another attempt fits in the time budget after `elapsed` has
    /// passed and `next_delay` is still to be slept.
    pub fn within_budget(&self, elapsed: Duration, next_delay: Duration) -> bool {
        match self.max_elapsed {
            Some(budget) => elapsed + next_delay <= budget,
            None => true,
        }
    }
}
