//! Per-part retry policy with capped exponential backoff

use crate::RemoteError;
use std::time::Duration;

/// How many times a part is attempted and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per part, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Fresh state for a part that has not been attempted yet
    pub fn start(&self) -> RetryState {
        RetryState {
            attempts: 0,
            next_delay: self.base_delay,
            waited: Duration::ZERO,
        }
    }

    /// Record a failed attempt and decide what happens next.
    ///
    /// `state.attempts` must already count the attempt that failed.
    pub fn on_failure(&self, state: &mut RetryState, error: &RemoteError) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::Fail;
        }
        if state.attempts >= self.max_attempts {
            return RetryDecision::Exhausted;
        }

        let delay = state.next_delay.min(self.max_delay);
        state.next_delay = delay.saturating_mul(2).min(self.max_delay);
        state.waited += delay;
        RetryDecision::RetryAfter(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_millis(2000), Duration::from_millis(30_000))
    }
}

/// Attempt bookkeeping for one part, dropped once the part is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub next_delay: Duration,
    /// Total backoff slept so far
    pub waited: Duration,
}

impl RetryState {
    /// Mark the start of another attempt and return its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// Transient failure, but no attempts left
    Exhausted,
    /// Retrying cannot help
    Fail,
}
