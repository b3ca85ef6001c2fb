//! Control-plane client interface.
//!
//! The cluster API itself lives outside this crate. Builds depend only on
//! the operations below and on whether they succeed, so any client that can
//! create, start, stop and delete VMs and read or change their configuration
//! can drive a build.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use templar_vm::CreateRequest;
use thiserror::Error;

/// Reference to a VM that exists on the cluster.
///
/// Only produced from an acknowledged create call or a lookup, and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmRef {
    vm_id: u32,
    node: String,
    pool: Option<String>,
}

impl VmRef {
    pub fn new(vm_id: u32, node: impl Into<String>, pool: Option<String>) -> Self {
        Self {
            vm_id,
            node: node.into(),
            pool,
        }
    }

    pub fn vm_id(&self) -> u32 {
        self.vm_id
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }
}

impl fmt::Display for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.vm_id, self.node)
    }
}

/// VM configuration as reported by the cluster.
pub type VmConfig = BTreeMap<String, String>;

/// A configuration update: keys to set and keys to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub set: BTreeMap<String, String>,
    pub delete: Vec<String>,
}

impl ConfigChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.set.insert(key.into(), value.into());
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.delete.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty()
    }
}

/// A network interface as seen by the guest agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInterface {
    pub name: String,
    #[serde(default)]
    pub hardware_address: Option<String>,
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
}

/// Errors surfaced by a control-plane client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// A VM with this identifier already exists
    #[error("VM {0} already exists")]
    AlreadyExists(u32),

    /// The addressed object does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The guest agent is not answering yet
    #[error("guest agent is not running")]
    AgentUnavailable,

    /// Any other failed operation
    #[error("{operation}: {message}")]
    Operation { operation: String, message: String },
}

impl RemoteError {
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_duplicate_id(&self) -> bool {
        matches!(self, RemoteError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Operations a build needs from the cluster.
///
/// A single build calls its client sequentially. Builds run through
/// [`run_builds`](crate::run_builds) may share one client concurrently.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Ask the cluster for an unused VM identifier.
    async fn next_free_id(&self) -> Result<u32, RemoteError>;

    /// Create (or clone) a VM as described by `request`.
    ///
    /// # Errors
    /// Returns [`RemoteError::AlreadyExists`] if the identifier is taken.
    async fn create_vm(&self, request: &CreateRequest) -> Result<VmRef, RemoteError>;

    /// Power on a VM.
    async fn start_vm(&self, vm: &VmRef) -> Result<(), RemoteError>;

    /// Power off a VM.
    async fn stop_vm(&self, vm: &VmRef) -> Result<(), RemoteError>;

    /// Delete a VM or template and its owned volumes.
    async fn delete_vm(&self, vm: &VmRef) -> Result<(), RemoteError>;

    /// Read a VM's configuration.
    ///
    /// # Errors
    /// Returns [`RemoteError::NotFound`] if the VM does not exist.
    async fn get_config(&self, vm: &VmRef) -> Result<VmConfig, RemoteError>;

    /// Apply a configuration change.
    async fn set_config(&self, vm: &VmRef, change: &ConfigChange) -> Result<(), RemoteError>;

    /// Find every VM carrying `name`.
    async fn list_by_name(&self, name: &str) -> Result<Vec<VmRef>, RemoteError>;

    /// Query the guest agent for network interfaces.
    ///
    /// # Errors
    /// Returns [`RemoteError::AgentUnavailable`] while the agent is not up.
    async fn guest_interfaces(&self, vm: &VmRef) -> Result<Vec<GuestInterface>, RemoteError>;

    /// Turn a stopped VM into a template.
    async fn convert_to_template(&self, vm: &VmRef) -> Result<(), RemoteError>;

    /// Upload a local ISO into `storage` on `node`, returning the volume.
    async fn upload_iso(&self, node: &str, storage: &str, path: &Path)
        -> Result<String, RemoteError>;

    /// Have `node` download an ISO into `storage`, returning the volume.
    async fn download_iso(
        &self,
        node: &str,
        storage: &str,
        url: &str,
        checksum: Option<&str>,
    ) -> Result<String, RemoteError>;

    /// Delete a storage volume.
    async fn delete_volume(&self, node: &str, volume: &str) -> Result<(), RemoteError>;
}
