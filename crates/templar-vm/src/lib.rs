//! # templar-vm
//!
//! Device layer for templar template builds.
//! Describes the hardware a build declares and maps it onto bus slots.
//!
//! ## Quick Start
//!
//! ```
//! use templar_vm::{allocate, BusFamily, DiskSpec, IsoSource, IsoSpec, OccupiedSlots};
//!
//! let disks = vec![DiskSpec::new(BusFamily::Scsi, "local-lvm", 20)];
//! let isos = vec![IsoSpec::pinned(
//!     BusFamily::Ide,
//!     2,
//!     IsoSource::volume("local:iso/debian-12.iso"),
//! )];
//!
//! let allocation = allocate(&disks, &isos, &OccupiedSlots::new()).unwrap();
//! assert_eq!(allocation.devices.disk_slot(0).unwrap().to_string(), "scsi0");
//! assert_eq!(allocation.devices.iso_slot(0).unwrap().to_string(), "ide2");
//! ```
//!
//! ## Features
//!
//! - **Bus Model**: IDE, SATA, SCSI and VirtIO with their hypervisor slot limits
//! - **Slot Allocation**: Pinned ISOs, then disks, then free-floating ISOs
//! - **Clone Awareness**: Slots inherited from a clone source are never reused silently
//! - **Create Requests**: Typed request embedding the allocated device map

mod allocator;
mod device;
mod error;
mod request;

pub use allocator::{
    allocate, Allocation, AllocationWarning, Allocator, Device, DeviceMap, OccupiedSlots,
};
pub use device::{
    AsyncIo, BusFamily, CacheMode, DiskFormat, DiskSpec, IsoSource, IsoSpec, NicModel, NicSpec,
    Slot,
};
pub use error::{AllocationError, AllocationErrors, DeviceRef, Result, VmError};
pub use request::{CloneFrom, CreateRequest, CreateRequestBuilder, OsType};
