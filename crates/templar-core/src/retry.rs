//! Duplicate-identifier retry policy for VM creation.

use crate::error::CoreError;

/// What to do after a failed create attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Ask for a fresh identifier and try again.
    Retry,
    /// Stop and fail the step with this error.
    GiveUp(CoreError),
}

/// Bounded retry around VM creation.
///
/// The cluster hands out "next free" identifiers without reserving them, so
/// a concurrent create can take one first. When the build did not ask for a
/// specific identifier, such collisions are retried with a fresh one. Any
/// other failure, or a collision on an explicit identifier, is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateIdRetry {
    max_attempts: u32,
}

impl DuplicateIdRetry {
    /// Create attempts allowed when the identifier is cluster-assigned.
    pub const MAX_ATTEMPTS: u32 = 3;

    pub fn new(explicit_id: bool) -> Self {
        Self {
            max_attempts: if explicit_id { 1 } else { Self::MAX_ATTEMPTS },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide after attempt number `attempt` (1-based) failed with `error`.
    pub fn decide(&self, attempt: u32, error: CoreError) -> RetryDecision {
        match error {
            CoreError::Remote(remote) if remote.is_duplicate_id() => {
                if attempt < self.max_attempts {
                    RetryDecision::Retry
                } else if self.max_attempts == 1 {
                    RetryDecision::GiveUp(CoreError::Remote(remote))
                } else {
                    RetryDecision::GiveUp(CoreError::RetriesExhausted {
                        attempts: attempt,
                        last: remote,
                    })
                }
            }
            other => RetryDecision::GiveUp(other),
        }
    }
}
