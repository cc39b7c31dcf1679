//! # Fibonacci Backoff
//!
//! Progressive retry delays for failed reconcile passes. Grows more slowly
//! than exponential backoff, so a key that keeps failing is retried often
//! enough to recover quickly once the cause goes away.
//!
//! Default sequence: 5s, 5s, 10s, 15s, 25s, 40s, ... 5m (max).

use std::time::Duration;

use cluster_store::ObjectKey;
use dashmap::DashMap;

/// Smallest retry delay after a failed pass.
pub const MIN_BACKOFF: Duration = Duration::from_secs(5);
/// Largest retry delay after a failed pass.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min` (used for the first two values)
    /// and capped at `max`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF, MAX_BACKOFF)
    }
}

/// Backoff state per object key, shared between the reconcile wrapper and
/// the error policy.
#[derive(Debug, Default)]
pub struct BackoffStates {
    states: DashMap<ObjectKey, FibonacciBackoff>,
}

impl BackoffStates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before retrying `key` after another failure.
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        self.states.entry(key.clone()).or_default().next_backoff()
    }

    /// Forget the failure history of `key` after a successful pass.
    pub fn reset(&self, key: &ObjectKey) {
        self.states.remove(key);
    }

    /// Number of keys currently backing off.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
