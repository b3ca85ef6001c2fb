//! Typed create request handed to the control plane.

use crate::allocator::DeviceMap;
use crate::device::NicSpec;
use crate::error::{Result, VmError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Guest operating system hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    #[default]
    L26,
    L24,
    Win10,
    Win11,
    Solaris,
    Other,
}

impl OsType {
    pub const fn as_str(self) -> &'static str {
        match self {
            OsType::L26 => "l26",
            OsType::L24 => "l24",
            OsType::Win10 => "win10",
            OsType::Win11 => "win11",
            OsType::Solaris => "solaris",
            OsType::Other => "other",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source VM for clone-flavored creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneFrom {
    pub vm_id: u32,
    pub node: String,
    /// Full copy rather than a linked clone
    pub full: bool,
}

/// Everything the control plane needs to create one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Identifier to create the VM under
    pub vm_id: u32,
    /// VM name
    pub name: String,
    /// Cluster node to place the VM on
    pub node: String,
    /// Resource pool (optional)
    pub pool: Option<String>,
    /// Cores per socket
    pub cores: u8,
    /// Socket count
    pub sockets: u8,
    /// Memory in MiB
    pub memory_mib: u32,
    /// CPU model
    pub cpu_type: String,
    /// Guest OS hint
    pub os: OsType,
    /// Enable the guest agent channel
    pub qemu_agent: bool,
    /// Network adapters, in `net0..` order
    pub nics: Vec<NicSpec>,
    /// Allocated disks and CD-ROMs
    pub devices: DeviceMap,
    /// Clone source, for clone builds
    pub clone_from: Option<CloneFrom>,
}

impl CreateRequest {
    /// Start building a request for `vm_id` on `node`.
    pub fn builder(vm_id: u32, node: impl Into<String>) -> CreateRequestBuilder {
        CreateRequestBuilder::new(vm_id, node)
    }

    /// Flattened VM configuration for clients that speak key/value configs.
    pub fn config_entries(&self) -> BTreeMap<String, String> {
        let mut entries = self.devices.config_entries();
        entries.insert("name".into(), self.name.clone());
        entries.insert("cores".into(), self.cores.to_string());
        entries.insert("sockets".into(), self.sockets.to_string());
        entries.insert("memory".into(), self.memory_mib.to_string());
        entries.insert("cpu".into(), self.cpu_type.clone());
        entries.insert("ostype".into(), self.os.to_string());
        entries.insert(
            "agent".into(),
            if self.qemu_agent { "1" } else { "0" }.to_string(),
        );
        for (n, nic) in self.nics.iter().enumerate() {
            entries.insert(format!("net{n}"), nic.config_value());
        }
        entries
    }
}

/// Fluent builder for [`CreateRequest`].
///
/// # Example
///
/// ```
/// use templar_vm::{allocate, BusFamily, CreateRequest, DiskSpec, OccupiedSlots};
///
/// let devices = allocate(
///     &[DiskSpec::new(BusFamily::Scsi, "local-lvm", 20)],
///     &[],
///     &OccupiedSlots::new(),
/// )
/// .unwrap()
/// .devices;
///
/// let request = CreateRequest::builder(105, "pve1")
///     .name("debian-12")
///     .cores(2)
///     .memory_mib(2048)
///     .devices(devices)
///     .build()
///     .unwrap();
/// assert_eq!(request.devices.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct CreateRequestBuilder {
    request: CreateRequest,
}

impl CreateRequestBuilder {
    /// Create a builder with default sizing.
    pub fn new(vm_id: u32, node: impl Into<String>) -> Self {
        Self {
            request: CreateRequest {
                vm_id,
                name: String::new(),
                node: node.into(),
                pool: None,
                cores: 1,
                sockets: 1,
                memory_mib: 512,
                cpu_type: "kvm64".into(),
                os: OsType::default(),
                qemu_agent: true,
                nics: Vec::new(),
                devices: DeviceMap::default(),
                clone_from: None,
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.request.name = name.into();
        self
    }

    pub fn pool(mut self, pool: Option<String>) -> Self {
        self.request.pool = pool;
        self
    }

    pub fn cores(mut self, cores: u8) -> Self {
        self.request.cores = cores;
        self
    }

    pub fn sockets(mut self, sockets: u8) -> Self {
        self.request.sockets = sockets;
        self
    }

    pub fn memory_mib(mut self, mib: u32) -> Self {
        self.request.memory_mib = mib;
        self
    }

    pub fn cpu_type(mut self, cpu_type: impl Into<String>) -> Self {
        self.request.cpu_type = cpu_type.into();
        self
    }

    pub fn os(mut self, os: OsType) -> Self {
        self.request.os = os;
        self
    }

    pub fn qemu_agent(mut self, enabled: bool) -> Self {
        self.request.qemu_agent = enabled;
        self
    }

    pub fn nics(mut self, nics: Vec<NicSpec>) -> Self {
        self.request.nics = nics;
        self
    }

    pub fn devices(mut self, devices: DeviceMap) -> Self {
        self.request.devices = devices;
        self
    }

    pub fn clone_from(mut self, source: CloneFrom) -> Self {
        self.request.clone_from = Some(source);
        self
    }

    /// Validate and return the request.
    ///
    /// # Errors
    /// Returns an error if the request has no name or zero-sized resources.
    pub fn build(self) -> Result<CreateRequest> {
        let request = self.request;
        if request.name.is_empty() {
            return Err(VmError::Config("name is required".into()));
        }
        if request.node.is_empty() {
            return Err(VmError::Config("node is required".into()));
        }
        if request.cores == 0 || request.sockets == 0 {
            return Err(VmError::Config(format!(
                "cores and sockets must be > 0, got {}x{}",
                request.sockets, request.cores
            )));
        }
        if request.memory_mib == 0 {
            return Err(VmError::Config("memory_mib must be > 0".into()));
        }
        if request.devices.is_empty() && request.clone_from.is_none() {
            return Err(VmError::MissingDevices(request.vm_id));
        }
        Ok(request)
    }
}
