//! Retry/error tracking per sensor record
//!
//! Two independent limits apply:
//! - `max_retries`: attempts within one read cycle before an `error` line
//! - `max_errors`: consecutive failures (across cycles) before eviction
//!
//! Only *consecutive* failures count; any success resets the streak.

use crate::error::ReadFailure;
use crate::registry::LifecycleState;

/// Limits taken from the bus settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryLimits {
    pub max_retries: u8,
    pub max_errors: u8,
}

/// What the scheduler must do with a read result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Reading accepted; `recovered` is set when the previous cycle ended
    /// with an error report
    Accepted { recovered: bool },
    /// Try again within the current cycle
    Retry,
    /// Retries for this cycle exhausted: emit one `error` line
    ReportError,
    /// Consecutive-failure limit reached: drop the record
    Evict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryTracker {
    consecutive_failures: u8,
    attempts_this_cycle: u8,
}

impl RetryTracker {
    pub const fn new() -> Self {
        Self {
            consecutive_failures: 0,
            attempts_this_cycle: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u8 {
        self.consecutive_failures
    }

    /// Reset the per-cycle attempt budget
    pub fn begin_cycle(&mut self) {
        self.attempts_this_cycle = 0;
    }

    /// Classify a read result and advance the lifecycle state
    pub fn record(
        &mut self,
        state: &mut LifecycleState,
        result: Result<(), ReadFailure>,
        limits: RetryLimits,
    ) -> Outcome {
        match result {
            Ok(()) => {
                let recovered = *state == LifecycleState::ErrorReported;
                self.consecutive_failures = 0;
                self.attempts_this_cycle = 0;
                *state = LifecycleState::Active;
                Outcome::Accepted { recovered }
            }
            Err(_) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.attempts_this_cycle = self.attempts_this_cycle.saturating_add(1);
                if self.consecutive_failures >= limits.max_errors {
                    *state = LifecycleState::Evicted;
                    Outcome::Evict
                } else if self.attempts_this_cycle < limits.max_retries {
                    Outcome::Retry
                } else {
                    *state = LifecycleState::ErrorReported;
                    Outcome::ReportError
                }
            }
        }
    }
}
