//! Error types for templar-vm.

use crate::device::{BusFamily, Slot};
use std::fmt;
use thiserror::Error;

/// Result type alias for templar-vm operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors raised while assembling a create request.
#[derive(Debug, Error)]
pub enum VmError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A device map was not produced for the request
    #[error("create request for VM {0} has no device map")]
    MissingDevices(u32),
}

/// Which declared device an allocation diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRef {
    /// Position in the caller's disk list.
    Disk(usize),
    /// Position in the caller's ISO list.
    Iso(usize),
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Disk(n) => write!(f, "disk {n}"),
            DeviceRef::Iso(n) => write!(f, "iso {n}"),
        }
    }
}

/// A single fatal allocation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The bus family has no free index left for this device.
    #[error("too many {bus} devices: {device} would need {bus}{index}, past the {capacity}-slot limit")]
    BusOverflow {
        bus: BusFamily,
        index: u8,
        capacity: u8,
        device: DeviceRef,
    },

    /// A pinned ISO names an index the bus does not have.
    #[error("{device} pinned to {bus}{index}, but {bus} only has slots 0-{}", .capacity - 1)]
    StaticIndexOutOfRange {
        bus: BusFamily,
        index: u8,
        capacity: u8,
        device: DeviceRef,
    },

    /// Two ISOs are pinned to the same slot.
    #[error("{device} pinned to {slot}, which is already pinned by another ISO")]
    DuplicateStatic { slot: Slot, device: DeviceRef },

    /// A slot label could not be parsed or is outside its bus range.
    #[error("malformed slot reference '{0}'")]
    MalformedSlot(String),
}

/// Every fatal diagnostic collected during one allocation pass.
///
/// Never empty when returned as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationErrors(Vec<AllocationError>);

impl AllocationErrors {
    /// Wrap diagnostics collected elsewhere, e.g. while reading slot keys
    /// from an existing VM. `errors` must not be empty.
    pub fn from_errors(errors: Vec<AllocationError>) -> Self {
        debug_assert!(!errors.is_empty());
        Self(errors)
    }

    /// The individual diagnostics, in the order they were found.
    pub fn errors(&self) -> &[AllocationError] {
        &self.0
    }

    /// Number of diagnostics.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for errors produced by the allocator.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocationError> {
        self.0.iter()
    }
}

impl From<AllocationError> for AllocationErrors {
    fn from(error: AllocationError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for AllocationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AllocationErrors {}
