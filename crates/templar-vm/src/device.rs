//! Device model: bus families, slots and the disk, ISO and NIC specs a build
//! declares.

use crate::error::AllocationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One of the four device-attachment buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusFamily {
    Ide,
    Sata,
    Scsi,
    Virtio,
}

impl BusFamily {
    /// All bus families, in allocation-table order.
    pub const ALL: [BusFamily; 4] = [
        BusFamily::Ide,
        BusFamily::Sata,
        BusFamily::Scsi,
        BusFamily::Virtio,
    ];

    /// Number of slots the hypervisor exposes on this bus.
    pub const fn capacity(self) -> u8 {
        match self {
            BusFamily::Ide => 4,
            BusFamily::Sata => 6,
            BusFamily::Scsi => 31,
            BusFamily::Virtio => 16,
        }
    }

    /// Lowercase name, as used in slot labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            BusFamily::Ide => "ide",
            BusFamily::Sata => "sata",
            BusFamily::Scsi => "scsi",
            BusFamily::Virtio => "virtio",
        }
    }

    pub(crate) const fn ordinal(self) -> usize {
        match self {
            BusFamily::Ide => 0,
            BusFamily::Sata => 1,
            BusFamily::Scsi => 2,
            BusFamily::Virtio => 3,
        }
    }
}

impl fmt::Display for BusFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusFamily {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BusFamily::ALL
            .into_iter()
            .find(|bus| bus.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AllocationError::MalformedSlot(s.to_string()))
    }
}

/// A single attachment point: bus family plus index.
///
/// Ordered by bus family first, then index, so maps keyed by `Slot` iterate
/// deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    bus: BusFamily,
    index: u8,
}

impl Slot {
    /// Create a slot, checking the index against the bus capacity.
    pub fn new(bus: BusFamily, index: u8) -> Result<Self, AllocationError> {
        if index >= bus.capacity() {
            return Err(AllocationError::MalformedSlot(format!("{bus}{index}")));
        }
        Ok(Self { bus, index })
    }

    /// Caller guarantees `index < bus.capacity()`.
    pub(crate) const fn new_unchecked(bus: BusFamily, index: u8) -> Self {
        Self { bus, index }
    }

    pub fn bus(&self) -> BusFamily {
        self.bus
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Interpret a VM configuration key as a slot.
    ///
    /// Returns `None` for keys that are not shaped like a slot label at all
    /// (`name`, `scsihw`, `net0`, `unused1`), and `Some(Err(_))` for keys that
    /// name a bus but an index it does not have (`ide9`).
    pub fn from_config_key(key: &str) -> Option<Result<Slot, AllocationError>> {
        let digits_at = key.find(|c: char| c.is_ascii_digit())?;
        let (prefix, digits) = key.split_at(digits_at);
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let bus = BusFamily::ALL.into_iter().find(|bus| bus.as_str() == prefix)?;
        let slot = digits
            .parse::<u8>()
            .map_err(|_| AllocationError::MalformedSlot(key.to_string()))
            .and_then(|index| Slot::new(bus, index))
            .map_err(|_| AllocationError::MalformedSlot(key.to_string()));
        Some(slot)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bus, self.index)
    }
}

impl FromStr for Slot {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slot::from_config_key(s).unwrap_or_else(|| Err(AllocationError::MalformedSlot(s.to_string())))
    }
}

impl Serialize for Slot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Slot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

/// Disk cache mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    None,
    Writethrough,
    Writeback,
    Unsafe,
    Directsync,
}

impl CacheMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            CacheMode::None => "none",
            CacheMode::Writethrough => "writethrough",
            CacheMode::Writeback => "writeback",
            CacheMode::Unsafe => "unsafe",
            CacheMode::Directsync => "directsync",
        }
    }
}

/// On-disk image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    #[default]
    Raw,
    Qcow2,
    Vmdk,
}

impl DiskFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Vmdk => "vmdk",
        }
    }
}

/// Asynchronous I/O backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncIo {
    Native,
    Threads,
    IoUring,
}

impl AsyncIo {
    pub const fn as_str(self) -> &'static str {
        match self {
            AsyncIo::Native => "native",
            AsyncIo::Threads => "threads",
            AsyncIo::IoUring => "io_uring",
        }
    }
}

/// A disk to create. The slot index is always chosen by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    /// Bus family the disk attaches to
    pub bus: BusFamily,
    /// Storage pool the volume is created in
    pub storage_pool: String,
    /// Capacity in GiB
    pub size_gib: u32,
    /// Cache mode
    #[serde(default)]
    pub cache: CacheMode,
    /// Image format
    #[serde(default)]
    pub format: DiskFormat,
    /// Async I/O mode (hypervisor default when unset)
    #[serde(default)]
    pub asyncio: Option<AsyncIo>,
    /// Pass discard/trim requests through
    #[serde(default)]
    pub discard: bool,
    /// Present the disk to the guest as an SSD
    #[serde(default)]
    pub emulate_ssd: bool,
    /// Use a dedicated I/O thread
    #[serde(default)]
    pub io_thread: bool,
    /// Leave the disk out of backups
    #[serde(default)]
    pub exclude_from_backup: bool,
}

impl DiskSpec {
    /// A disk with default cache, format and flags.
    pub fn new(bus: BusFamily, storage_pool: impl Into<String>, size_gib: u32) -> Self {
        Self {
            bus,
            storage_pool: storage_pool.into(),
            size_gib,
            cache: CacheMode::default(),
            format: DiskFormat::default(),
            asyncio: None,
            discard: false,
            emulate_ssd: false,
            io_thread: false,
            exclude_from_backup: false,
        }
    }

    /// Render the disk as a VM configuration value.
    pub fn config_value(&self) -> String {
        let mut value = format!(
            "{}:{},format={},cache={}",
            self.storage_pool,
            self.size_gib,
            self.format.as_str(),
            self.cache.as_str()
        );
        if let Some(aio) = self.asyncio {
            value.push_str(",aio=");
            value.push_str(aio.as_str());
        }
        if self.discard {
            value.push_str(",discard=on");
        }
        if self.emulate_ssd {
            value.push_str(",ssd=1");
        }
        if self.io_thread {
            value.push_str(",iothread=1");
        }
        if self.exclude_from_backup {
            value.push_str(",backup=0");
        }
        value
    }
}

/// Where the contents of a CD-ROM device come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IsoSource {
    /// A volume already present in a storage pool, e.g. `local:iso/debian.iso`.
    Volume { path: String },
    /// A local file to upload into `storage` before the VM is created.
    Upload { path: PathBuf, storage: String },
    /// A URL the node downloads into `storage` before the VM is created.
    Download {
        url: String,
        checksum: Option<String>,
        storage: String,
    },
    /// A generated cloud-init drive in `storage`.
    CloudInit { storage: String },
}

impl IsoSource {
    pub fn volume(path: impl Into<String>) -> Self {
        IsoSource::Volume { path: path.into() }
    }

    pub fn is_cloud_init(&self) -> bool {
        matches!(self, IsoSource::CloudInit { .. })
    }
}

/// A boot or auxiliary CD-ROM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoSpec {
    /// Bus family the CD-ROM attaches to
    pub bus: BusFamily,
    /// Explicit index; `None` lets the allocator choose
    #[serde(default)]
    pub index: Option<u8>,
    /// Media source
    pub source: IsoSource,
    /// Detach the media once provisioning is done
    #[serde(default)]
    pub unmount: bool,
    /// When unmounting, keep an empty CD-ROM device in the slot
    #[serde(default)]
    pub keep_device: bool,
}

impl IsoSpec {
    /// An ISO whose slot the allocator chooses.
    pub fn dynamic(bus: BusFamily, source: IsoSource) -> Self {
        Self {
            bus,
            index: None,
            source,
            unmount: false,
            keep_device: false,
        }
    }

    /// An ISO pinned to `bus{index}`.
    pub fn pinned(bus: BusFamily, index: u8, source: IsoSource) -> Self {
        Self {
            index: Some(index),
            ..Self::dynamic(bus, source)
        }
    }

    /// Mark the media for removal after provisioning.
    pub fn unmounted(mut self, keep_device: bool) -> Self {
        self.unmount = true;
        self.keep_device = keep_device;
        self
    }

    /// Render the CD-ROM as a VM configuration value.
    pub fn config_value(&self) -> String {
        match &self.source {
            IsoSource::Volume { path } => format!("{path},media=cdrom"),
            IsoSource::CloudInit { storage } => format!("{storage}:cloudinit,media=cdrom"),
            IsoSource::Upload { .. } | IsoSource::Download { .. } => "none,media=cdrom".to_string(),
        }
    }
}

/// Virtual NIC model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NicModel {
    #[default]
    Virtio,
    E1000,
    Rtl8139,
    Vmxnet3,
}

impl NicModel {
    pub const fn as_str(self) -> &'static str {
        match self {
            NicModel::Virtio => "virtio",
            NicModel::E1000 => "e1000",
            NicModel::Rtl8139 => "rtl8139",
            NicModel::Vmxnet3 => "vmxnet3",
        }
    }
}

/// Network adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicSpec {
    /// Adapter model
    #[serde(default)]
    pub model: NicModel,
    /// Host bridge the adapter plugs into
    pub bridge: String,
    /// VLAN tag (optional)
    #[serde(default)]
    pub vlan_tag: Option<u16>,
    /// MAC address (optional, generated by the hypervisor if None)
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Enable the hypervisor firewall on this adapter
    #[serde(default)]
    pub firewall: bool,
}

impl Default for NicSpec {
    fn default() -> Self {
        Self {
            model: NicModel::Virtio,
            bridge: "vmbr0".into(),
            vlan_tag: None,
            mac_address: None,
            firewall: false,
        }
    }
}

impl NicSpec {
    /// Render the adapter as a VM configuration value.
    pub fn config_value(&self) -> String {
        let mut value = match &self.mac_address {
            Some(mac) => format!("{}={mac},bridge={}", self.model.as_str(), self.bridge),
            None => format!("{},bridge={}", self.model.as_str(), self.bridge),
        };
        if let Some(tag) = self.vlan_tag {
            value.push_str(&format!(",tag={tag}"));
        }
        if self.firewall {
            value.push_str(",firewall=1");
        }
        value
    }
}
