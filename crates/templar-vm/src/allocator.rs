//! Device slot allocation.
//!
//! Maps a build's disks and ISOs onto bus slots. The order of placement is
//! part of the contract because it decides who wins a contested slot:
//!
//! 1. ISOs with an explicit index, exactly where they ask to be. Landing on
//!    a slot inherited from a clone source is allowed and produces a warning.
//! 2. Disks, in declaration order, each taking the lowest free index on its
//!    bus.
//! 3. ISOs without an index, by the same rule as disks.
//!
//! Overflow does not stop the pass: every unplaceable device is reported, and
//! no map is returned if anything failed.

use crate::device::{BusFamily, DiskSpec, IsoSpec, Slot};
use crate::error::{AllocationError, AllocationErrors, DeviceRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Slots consumed outside this build, e.g. by the VM being cloned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupiedSlots(BTreeSet<Slot>);

impl OccupiedSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the slot was already recorded.
    pub fn insert(&mut self, slot: Slot) -> bool {
        self.0.insert(slot)
    }

    pub fn contains(&self, slot: &Slot) -> bool {
        self.0.contains(slot)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.0.iter()
    }
}

impl FromIterator<Slot> for OccupiedSlots {
    fn from_iter<I: IntoIterator<Item = Slot>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A device placed in a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Device {
    Disk(DiskSpec),
    Cdrom(IsoSpec),
}

impl Device {
    /// Render the device as a VM configuration value.
    pub fn config_value(&self) -> String {
        match self {
            Device::Disk(disk) => disk.config_value(),
            Device::Cdrom(iso) => iso.config_value(),
        }
    }
}

/// Result of a successful allocation: an injective slot-to-device mapping
/// that covers every submitted disk and ISO exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMap {
    devices: BTreeMap<Slot, Device>,
    disk_slots: Vec<Slot>,
    iso_slots: Vec<Slot>,
}

impl DeviceMap {
    pub fn get(&self, slot: &Slot) -> Option<&Device> {
        self.devices.get(slot)
    }

    /// Devices in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&Slot, &Device)> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Slot of the n-th declared disk.
    pub fn disk_slot(&self, n: usize) -> Option<Slot> {
        self.disk_slots.get(n).copied()
    }

    /// Slot of the n-th declared ISO.
    pub fn iso_slot(&self, n: usize) -> Option<Slot> {
        self.iso_slots.get(n).copied()
    }

    pub fn disk_slots(&self) -> &[Slot] {
        &self.disk_slots
    }

    pub fn iso_slots(&self) -> &[Slot] {
        &self.iso_slots
    }

    /// Configuration entries for every device, keyed by slot label.
    pub fn config_entries(&self) -> BTreeMap<String, String> {
        self.devices
            .iter()
            .map(|(slot, device)| (slot.to_string(), device.config_value()))
            .collect()
    }
}

/// Non-fatal allocation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationWarning {
    /// A pinned ISO took a slot that an inherited device already used.
    OverridesInherited { slot: Slot, iso: usize },
}

impl fmt::Display for AllocationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationWarning::OverridesInherited { slot, iso } => write!(
                f,
                "iso {iso} is pinned to {slot}, replacing the device inherited from the clone source"
            ),
        }
    }
}

/// Successful allocation output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub devices: DeviceMap,
    pub warnings: Vec<AllocationWarning>,
}

/// Allocate slots for `disks` and `isos`, avoiding `occupied`.
///
/// Pure and deterministic: identical inputs always give identical output.
pub fn allocate(
    disks: &[DiskSpec],
    isos: &[IsoSpec],
    occupied: &OccupiedSlots,
) -> Result<Allocation, AllocationErrors> {
    Allocator::new(occupied).run(disks, isos)
}

/// Single-use allocation pass.
///
/// Holds a per-bus cursor. Because pinned ISOs are placed before any scan
/// starts and claims are never released, the lowest free index on a bus only
/// moves upward, so a scan can resume where the previous one stopped.
#[derive(Debug)]
pub struct Allocator<'a> {
    occupied: &'a OccupiedSlots,
    claimed: BTreeSet<Slot>,
    cursors: [u8; 4],
    errors: Vec<AllocationError>,
    warnings: Vec<AllocationWarning>,
}

impl<'a> Allocator<'a> {
    pub fn new(occupied: &'a OccupiedSlots) -> Self {
        Self {
            occupied,
            claimed: BTreeSet::new(),
            cursors: [0; 4],
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn run(mut self, disks: &[DiskSpec], isos: &[IsoSpec]) -> Result<Allocation, AllocationErrors> {
        let mut devices = BTreeMap::new();
        let mut iso_slots: Vec<Option<Slot>> = vec![None; isos.len()];
        let mut disk_slots = Vec::with_capacity(disks.len());

        for (n, iso) in isos.iter().enumerate() {
            let Some(index) = iso.index else { continue };
            if let Some(slot) = self.place_pinned(n, iso.bus, index) {
                devices.insert(slot, Device::Cdrom(iso.clone()));
                iso_slots[n] = Some(slot);
            }
        }

        for (n, disk) in disks.iter().enumerate() {
            if let Some(slot) = self.place_next(DeviceRef::Disk(n), disk.bus) {
                devices.insert(slot, Device::Disk(disk.clone()));
                disk_slots.push(slot);
            }
        }

        for (n, iso) in isos.iter().enumerate() {
            if iso.index.is_some() {
                continue;
            }
            if let Some(slot) = self.place_next(DeviceRef::Iso(n), iso.bus) {
                devices.insert(slot, Device::Cdrom(iso.clone()));
                iso_slots[n] = Some(slot);
            }
        }

        if !self.errors.is_empty() {
            return Err(AllocationErrors::from_errors(self.errors));
        }

        Ok(Allocation {
            devices: DeviceMap {
                devices,
                disk_slots,
                iso_slots: iso_slots.into_iter().flatten().collect(),
            },
            warnings: self.warnings,
        })
    }

    fn place_pinned(&mut self, n: usize, bus: BusFamily, index: u8) -> Option<Slot> {
        let device = DeviceRef::Iso(n);
        if index >= bus.capacity() {
            self.errors.push(AllocationError::StaticIndexOutOfRange {
                bus,
                index,
                capacity: bus.capacity(),
                device,
            });
            return None;
        }
        let slot = Slot::new_unchecked(bus, index);
        if !self.claimed.insert(slot) {
            self.errors.push(AllocationError::DuplicateStatic { slot, device });
            return None;
        }
        if self.occupied.contains(&slot) {
            self.warnings
                .push(AllocationWarning::OverridesInherited { slot, iso: n });
        }
        Some(slot)
    }

    fn place_next(&mut self, device: DeviceRef, bus: BusFamily) -> Option<Slot> {
        let capacity = bus.capacity();
        let cursor = &mut self.cursors[bus.ordinal()];
        while *cursor < capacity {
            let slot = Slot::new_unchecked(bus, *cursor);
            *cursor += 1;
            if self.occupied.contains(&slot) || self.claimed.contains(&slot) {
                continue;
            }
            self.claimed.insert(slot);
            return Some(slot);
        }
        self.errors.push(AllocationError::BusOverflow {
            bus,
            index: capacity,
            capacity,
            device,
        });
        None
    }
}
