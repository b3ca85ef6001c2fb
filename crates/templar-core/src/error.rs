//! Error types for templar-core.

use crate::client::RemoteError;
use std::fmt;
use std::time::Duration;
use templar_vm::{AllocationErrors, VmError};
use thiserror::Error;

/// Result type alias for templar-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors a build step can halt with.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Devices did not fit the buses; nothing was sent to the cluster
    #[error("device allocation failed: {0}")]
    Allocation(#[from] AllocationErrors),

    /// Create request could not be assembled
    #[error(transparent)]
    Request(#[from] VmError),

    /// Error reported by the control plane
    #[error("remote operation failed: {0}")]
    Remote(#[from] RemoteError),

    /// Remote call did not answer in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Configured task timeout
        after: Duration,
    },

    /// Every freshly requested identifier was already taken
    #[error("VM identifier still taken after {attempts} create attempts: {last}")]
    RetriesExhausted {
        /// Number of create calls made
        attempts: u32,
        /// Error from the final attempt
        last: RemoteError,
    },

    /// Clone source could not be resolved
    #[error("clone source: {0}")]
    CloneSource(String),

    /// Guest never reported a usable address
    #[error("no usable guest address for VM {vm_id} after {after:?}")]
    NoGuestAddress {
        /// VM that was polled
        vm_id: u32,
        /// How long the agent was polled
        after: Duration,
    },

    /// Provisioning hook failed
    #[error("provisioning failed: {0}")]
    Provision(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Invalid build configuration
    #[error("invalid build configuration: {0}")]
    Config(String),

    /// A step ran before the step that produces its input
    #[error("build state is missing {0}")]
    MissingState(&'static str),

    /// Build was cancelled while waiting on a remote operation
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Whether the control plane rejected a create because the identifier
    /// already exists.
    pub fn is_duplicate_id(&self) -> bool {
        matches!(self, CoreError::Remote(e) if e.is_duplicate_id())
    }
}

/// A cleanup action that did not complete. The remote object it names may
/// still exist and needs operator attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    /// What cleanup tried to do, e.g. `"delete VM"`
    pub action: &'static str,
    /// The object it was acting on
    pub target: String,
    /// Why it failed
    pub reason: String,
}

impl CleanupFailure {
    pub fn new(action: &'static str, target: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self {
            action,
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not {} {} ({}); remove it manually",
            self.action, self.target, self.reason
        )
    }
}

/// The single failure a caller sees when a build does not produce an
/// artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A step halted the pipeline
    #[error("build step '{step}' failed: {source}{}", render_leftovers(.cleanup))]
    StepFailed {
        /// Name of the halting step
        step: &'static str,
        /// Error the step halted with
        #[source]
        source: CoreError,
        /// Cleanup actions that failed afterwards
        cleanup: Vec<CleanupFailure>,
    },

    /// The build was cancelled
    #[error("build cancelled at step '{step}'{}", render_leftovers(.cleanup))]
    Cancelled {
        /// Step that was running or about to run
        step: &'static str,
        /// Cleanup actions that failed afterwards
        cleanup: Vec<CleanupFailure>,
    },
}

impl BuildError {
    /// Name of the step the build stopped at.
    pub fn step(&self) -> &'static str {
        match self {
            BuildError::StepFailed { step, .. } | BuildError::Cancelled { step, .. } => *step,
        }
    }

    /// Cleanup actions that failed after the build stopped.
    pub fn cleanup_failures(&self) -> &[CleanupFailure] {
        match self {
            BuildError::StepFailed { cleanup, .. } | BuildError::Cancelled { cleanup, .. } => {
                cleanup
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildError::Cancelled { .. })
    }
}

fn render_leftovers(cleanup: &[CleanupFailure]) -> String {
    cleanup
        .iter()
        .map(|failure| format!("; cleanup: {failure}"))
        .collect()
}
