//! Retry decisions

use crate::Error;

/// Position of one attempt within a logical call.
///
/// Each resubmission gets a new context from [`next`](Self::next); the
/// remaining budget only ever decreases along a call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    attempt: u32,
    remaining: u32,
}

impl AttemptContext {
    /// Context of the first attempt with `budget` resubmissions allowed
    pub fn first(budget: u32) -> Self {
        Self {
            attempt: 1,
            remaining: budget,
        }
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Resubmissions still allowed after this attempt
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Context of the following attempt, consuming one unit of budget
    pub fn next(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            remaining: self.remaining.saturating_sub(1),
        }
    }
}

/// Whether the attempt that failed with `error` should be resubmitted.
///
/// Requires a retryable error (never a cancellation) and a positive budget.
/// Resubmission is immediate; there is no backoff.
pub fn should_retry(context: &AttemptContext, error: &Error) -> bool {
    context.remaining > 0 && !error.is_cancelled() && error.is_retryable()
}
