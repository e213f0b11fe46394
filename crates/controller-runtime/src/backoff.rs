//! # Exponential Backoff
//!
//! Provides an exponential backoff mechanism for retries.
//! Each delay doubles the previous one, starting at a base delay and capped at a
//! maximum: `base * 2^failures`, never more than `max`.
//!
//! Two forms are provided:
//! - [`ExponentialBackoff`]: a stateful sequence, used by the informer between re-lists
//! - [`ItemBackoff`]: per-key failure counters, used by the work queue for rate-limited requeues

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Default base delay for per-item requeues.
pub const DEFAULT_ITEM_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default ceiling for per-item requeues.
pub const DEFAULT_ITEM_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff calculator
///
/// Generates backoff durations that double on every call, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay returned by the first call (and after a reset)
    base: Duration,
    /// Upper bound for any delay
    max: Duration,
    /// Number of delays handed out since the last reset
    failures: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given base and maximum delays
    ///
    /// # Arguments
    ///
    /// * `base` - First delay in the sequence
    /// * `max` - Maximum delay (caps the sequence)
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Self::calculate_for_failure_count(self.failures, self.base, self.max);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Calculate the backoff duration for a given failure count (stateless)
    ///
    /// The sequence starts at `base` for `failures == 0` and doubles for every
    /// further failure, capped at `max`. Overflow saturates to `max`.
    #[must_use]
    pub fn calculate_for_failure_count(failures: u32, base: Duration, max: Duration) -> Duration {
        let Some(factor) = 2u32.checked_pow(failures) else {
            return max;
        };
        base.checked_mul(factor).map_or(max, |delay| delay.min(max))
    }
}

/// Per-key exponential backoff
///
/// Tracks how many times each key was requeued after a failure. The counter is
/// the exponent of the next delay and is cleared with [`ItemBackoff::forget`].
#[derive(Debug, Clone)]
pub struct ItemBackoff<K> {
    base: Duration,
    max: Duration,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> ItemBackoff<K> {
    /// Create a per-key limiter with the given base and maximum delays
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Delay before `key` should be retried; counts one more failure for it
    pub fn when(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = ExponentialBackoff::calculate_for_failure_count(*failures, self.base, self.max);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Number of failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Clear the failure history of `key`
    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }
}

impl<K: Eq + Hash + Clone> Default for ItemBackoff<K> {
    fn default() -> Self {
        Self::new(DEFAULT_ITEM_BASE_DELAY, DEFAULT_ITEM_MAX_DELAY)
    }
}
