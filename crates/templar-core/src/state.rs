//! Per-build mutable state threaded through the step pipeline.

use crate::client::VmRef;
use crate::config::BuildSpec;
use crate::error::{CleanupFailure, CoreError};
use std::fmt;
use templar_vm::{AllocationWarning, DeviceMap, IsoSpec, OccupiedSlots};
use uuid::Uuid;

/// Unique identifier for one build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildId(Uuid);

impl BuildId {
    /// Create a new random build ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a build is in its lifecycle.
///
/// Moves strictly forward through `NotStarted → Created → Started →
/// Provisioned → Finalized → Succeeded`; `Failed` and `Cancelled` can be
/// entered from any non-terminal phase and are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildPhase {
    NotStarted,
    Created,
    Started,
    Provisioned,
    Finalized,
    Succeeded,
    Failed,
    Cancelled,
}

impl BuildPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildPhase::Succeeded | BuildPhase::Failed | BuildPhase::Cancelled
        )
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::Created => write!(f, "Created"),
            Self::Started => write!(f, "Started"),
            Self::Provisioned => write!(f, "Provisioned"),
            Self::Finalized => write!(f, "Finalized"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Build-scoped state. Created when a build starts and dropped when it ends;
/// never shared between builds.
#[derive(Debug)]
pub struct BuildState {
    build_id: BuildId,
    phase: BuildPhase,
    vm: Option<VmRef>,
    error: Option<CoreError>,
    template_converted: bool,
    cleanup_failures: Vec<CleanupFailure>,

    /// ISOs with their sources resolved to store volumes as pre-steps run.
    pub isos: Vec<IsoSpec>,
    /// Slots taken by the clone source.
    pub occupied: OccupiedSlots,
    /// VM being cloned, once resolved.
    pub clone_source: Option<VmRef>,
    /// Device map the VM was created with.
    pub devices: Option<DeviceMap>,
    pub allocation_warnings: Vec<AllocationWarning>,
    /// Volumes this build put into storage.
    pub created_volumes: Vec<String>,
    /// Guest address used for provisioning.
    pub host: Option<String>,
}

impl BuildState {
    pub fn new(spec: &BuildSpec) -> Self {
        Self::with_id(BuildId::new(), spec)
    }

    pub fn with_id(build_id: BuildId, spec: &BuildSpec) -> Self {
        Self {
            build_id,
            phase: BuildPhase::NotStarted,
            vm: None,
            error: None,
            template_converted: false,
            cleanup_failures: Vec::new(),
            isos: spec.isos.clone(),
            occupied: OccupiedSlots::new(),
            clone_source: None,
            devices: None,
            allocation_warnings: Vec::new(),
            created_volumes: Vec::new(),
            host: None,
        }
    }

    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    /// Advance to `phase`. Backward moves and moves out of a terminal phase
    /// are ignored.
    pub fn advance(&mut self, phase: BuildPhase) {
        if self.phase.is_terminal() || phase <= self.phase {
            tracing::trace!(from = %self.phase, to = %phase, "Ignoring phase change");
            return;
        }
        tracing::debug!(build_id = %self.build_id, from = %self.phase, to = %phase, "Build phase");
        self.phase = phase;
    }

    /// The created VM, present only once a create call was acknowledged.
    pub fn vm(&self) -> Option<&VmRef> {
        self.vm.as_ref()
    }

    /// The created VM, or an error for steps that cannot run without one.
    pub fn require_vm(&self) -> Result<VmRef, CoreError> {
        self.vm.clone().ok_or(CoreError::MissingState("created VM"))
    }

    /// Record the acknowledged VM. The reference is never replaced.
    pub(crate) fn record_vm(&mut self, vm: VmRef) {
        debug_assert!(self.vm.is_none(), "VM recorded twice");
        if self.vm.is_none() {
            self.vm = Some(vm);
            self.advance(BuildPhase::Created);
        }
    }

    pub(crate) fn mark_template_converted(&mut self) {
        self.template_converted = true;
    }

    /// Whether the VM has become the final template.
    pub fn template_converted(&self) -> bool {
        self.template_converted
    }

    /// Terminal success marker.
    pub fn succeeded(&self) -> bool {
        self.phase == BuildPhase::Succeeded
    }

    pub(crate) fn halt(&mut self, error: CoreError) {
        self.error = Some(error);
        self.advance(BuildPhase::Failed);
    }

    pub(crate) fn cancel(&mut self) {
        self.advance(BuildPhase::Cancelled);
    }

    /// Error the pipeline halted with, if any.
    pub fn error(&self) -> Option<&CoreError> {
        self.error.as_ref()
    }

    pub(crate) fn take_error(&mut self) -> Option<CoreError> {
        self.error.take()
    }

    pub(crate) fn push_cleanup_failure(&mut self, failure: CleanupFailure) {
        tracing::warn!(build_id = %self.build_id, %failure, "Cleanup action failed");
        self.cleanup_failures.push(failure);
    }

    pub fn cleanup_failures(&self) -> &[CleanupFailure] {
        &self.cleanup_failures
    }

    pub(crate) fn take_cleanup_failures(&mut self) -> Vec<CleanupFailure> {
        std::mem::take(&mut self.cleanup_failures)
    }
}
