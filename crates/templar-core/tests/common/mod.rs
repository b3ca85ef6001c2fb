//! In-memory control plane and provisioner for pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use templar_core::{
    ConfigChange, ControlPlane, GuestInterface, ProvisionTarget, Provisioner, RemoteError,
    VmConfig, VmRef,
};
use templar_vm::CreateRequest;

pub const NODE: &str = "pve1";

/// Route test logs through the fmt subscriber when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One recorded control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    NextFreeId,
    Create { vm_id: u32, clone_of: Option<u32> },
    Start(u32),
    Stop(u32),
    Delete(u32),
    GetConfig(u32),
    SetConfig(u32, ConfigChange),
    ListByName(String),
    GuestInterfaces(u32),
    ConvertToTemplate(u32),
    UploadIso(String),
    DownloadIso(String),
    DeleteVolume(String),
}

/// Injected behavior for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Fail,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Create,
    Start,
    Stop,
    Delete,
    SetConfig,
    GuestInterfaces,
    Convert,
    Upload,
    Download,
    DeleteVolume,
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    vms: BTreeMap<u32, VmConfig>,
    templates: BTreeSet<u32>,
    volumes: BTreeSet<String>,
    calls: Vec<Call>,
    faults: BTreeMap<Op, Fault>,
    duplicate_creates: u32,
    agent_down_polls: u32,
    interfaces: Vec<GuestInterface>,
}

/// Cluster stand-in that keeps VM configs in memory.
pub struct MemoryControlPlane {
    inner: Mutex<Inner>,
}

impl MemoryControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                next_id: 100,
                interfaces: vec![
                    iface("lo", &["127.0.0.1", "::1"]),
                    iface("eth0", &["fe80::1", "10.0.0.5"]),
                ],
                ..Default::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Seed an existing VM.
    pub fn insert_vm(&self, vm_id: u32, name: &str, entries: &[(&str, &str)]) {
        let mut config: VmConfig = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config.insert("name".into(), name.into());
        let mut inner = self.lock();
        inner.vms.insert(vm_id, config);
        inner.next_id = inner.next_id.max(vm_id + 1);
    }

    pub fn fault(&self, op: Op, fault: Fault) {
        self.lock().faults.insert(op, fault);
    }

    /// Make the next `n` create calls collide with an existing identifier.
    pub fn duplicate_creates(&self, n: u32) {
        self.lock().duplicate_creates = n;
    }

    /// Report the guest agent as unavailable for the next `n` queries.
    pub fn agent_down_for(&self, n: u32) {
        self.lock().agent_down_polls = n;
    }

    pub fn set_interfaces(&self, interfaces: Vec<GuestInterface>) {
        self.lock().interfaces = interfaces;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn config(&self, vm_id: u32) -> Option<VmConfig> {
        self.lock().vms.get(&vm_id).cloned()
    }

    pub fn vm_ids(&self) -> Vec<u32> {
        self.lock().vms.keys().copied().collect()
    }

    pub fn is_template(&self, vm_id: u32) -> bool {
        self.lock().templates.contains(&vm_id)
    }

    pub fn volumes(&self) -> Vec<String> {
        self.lock().volumes.iter().cloned().collect()
    }

    async fn enter(&self, op: Op, call: Call) -> Result<(), RemoteError> {
        let fault = {
            let mut inner = self.lock();
            inner.calls.push(call);
            inner.faults.get(&op).copied()
        };
        match fault {
            Some(Fault::Fail) => Err(RemoteError::operation(format!("{op:?}"), "injected failure")),
            Some(Fault::Hang) => std::future::pending().await,
            None => Ok(()),
        }
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }
}

pub fn iface(name: &str, addresses: &[&str]) -> GuestInterface {
    GuestInterface {
        name: name.into(),
        hardware_address: None,
        addresses: addresses
            .iter()
            .map(|a| a.parse::<IpAddr>().unwrap())
            .collect(),
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn next_free_id(&self) -> Result<u32, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(Call::NextFreeId);
        let id = inner.next_id;
        inner.next_id += 1;
        Ok(id)
    }

    async fn create_vm(&self, request: &CreateRequest) -> Result<VmRef, RemoteError> {
        let clone_of = request.clone_from.as_ref().map(|c| c.vm_id);
        self.enter(
            Op::Create,
            Call::Create {
                vm_id: request.vm_id,
                clone_of,
            },
        )
        .await?;

        let mut inner = self.lock();
        if inner.duplicate_creates > 0 {
            inner.duplicate_creates -= 1;
            return Err(RemoteError::AlreadyExists(request.vm_id));
        }
        if inner.vms.contains_key(&request.vm_id) {
            return Err(RemoteError::AlreadyExists(request.vm_id));
        }

        let mut config = match clone_of {
            Some(source) => inner
                .vms
                .get(&source)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(format!("VM {source}")))?,
            None => VmConfig::new(),
        };
        config.extend(request.config_entries());
        inner.vms.insert(request.vm_id, config);
        Ok(VmRef::new(
            request.vm_id,
            request.node.clone(),
            request.pool.clone(),
        ))
    }

    async fn start_vm(&self, vm: &VmRef) -> Result<(), RemoteError> {
        self.enter(Op::Start, Call::Start(vm.vm_id())).await
    }

    async fn stop_vm(&self, vm: &VmRef) -> Result<(), RemoteError> {
        self.enter(Op::Stop, Call::Stop(vm.vm_id())).await
    }

    async fn delete_vm(&self, vm: &VmRef) -> Result<(), RemoteError> {
        self.enter(Op::Delete, Call::Delete(vm.vm_id())).await?;
        let mut inner = self.lock();
        inner.templates.remove(&vm.vm_id());
        inner
            .vms
            .remove(&vm.vm_id())
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("VM {}", vm.vm_id())))
    }

    async fn get_config(&self, vm: &VmRef) -> Result<VmConfig, RemoteError> {
        self.record(Call::GetConfig(vm.vm_id()));
        self.lock()
            .vms
            .get(&vm.vm_id())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("VM {}", vm.vm_id())))
    }

    async fn set_config(&self, vm: &VmRef, change: &ConfigChange) -> Result<(), RemoteError> {
        self.enter(Op::SetConfig, Call::SetConfig(vm.vm_id(), change.clone()))
            .await?;
        let mut inner = self.lock();
        let config = inner
            .vms
            .get_mut(&vm.vm_id())
            .ok_or_else(|| RemoteError::NotFound(format!("VM {}", vm.vm_id())))?;
        for key in &change.delete {
            config.remove(key);
        }
        config.extend(change.set.clone());
        Ok(())
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<VmRef>, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(Call::ListByName(name.into()));
        Ok(inner
            .vms
            .iter()
            .filter(|(_, config)| config.get("name").map(String::as_str) == Some(name))
            .map(|(id, _)| VmRef::new(*id, NODE, None))
            .collect())
    }

    async fn guest_interfaces(&self, vm: &VmRef) -> Result<Vec<GuestInterface>, RemoteError> {
        self.enter(Op::GuestInterfaces, Call::GuestInterfaces(vm.vm_id()))
            .await?;
        let mut inner = self.lock();
        if inner.agent_down_polls > 0 {
            inner.agent_down_polls -= 1;
            return Err(RemoteError::AgentUnavailable);
        }
        Ok(inner.interfaces.clone())
    }

    async fn convert_to_template(&self, vm: &VmRef) -> Result<(), RemoteError> {
        self.enter(Op::Convert, Call::ConvertToTemplate(vm.vm_id()))
            .await?;
        let mut inner = self.lock();
        inner.templates.insert(vm.vm_id());
        if let Some(config) = inner.vms.get_mut(&vm.vm_id()) {
            config.insert("template".into(), "1".into());
        }
        Ok(())
    }

    async fn upload_iso(
        &self,
        _node: &str,
        storage: &str,
        path: &Path,
    ) -> Result<String, RemoteError> {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.enter(Op::Upload, Call::UploadIso(file.clone())).await?;
        let volume = format!("{storage}:iso/{file}");
        self.lock().volumes.insert(volume.clone());
        Ok(volume)
    }

    async fn download_iso(
        &self,
        _node: &str,
        storage: &str,
        url: &str,
        _checksum: Option<&str>,
    ) -> Result<String, RemoteError> {
        self.enter(Op::Download, Call::DownloadIso(url.into())).await?;
        let file = url.rsplit('/').next().unwrap_or(url);
        let volume = format!("{storage}:iso/{file}");
        self.lock().volumes.insert(volume.clone());
        Ok(volume)
    }

    async fn delete_volume(&self, _node: &str, volume: &str) -> Result<(), RemoteError> {
        self.enter(Op::DeleteVolume, Call::DeleteVolume(volume.into()))
            .await?;
        self.lock().volumes.remove(volume);
        Ok(())
    }
}

/// Provisioner that records its targets.
#[derive(Default)]
pub struct RecordingProvisioner {
    targets: Mutex<Vec<ProvisionTarget>>,
    fault: Option<Fault>,
}

impl RecordingProvisioner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_fault(fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            fault: Some(fault),
            ..Default::default()
        })
    }

    pub fn targets(&self) -> Vec<ProvisionTarget> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn provision(
        &self,
        target: &ProvisionTarget,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.targets.lock().unwrap().push(target.clone());
        match self.fault {
            Some(Fault::Fail) => Err("provisioning script exited with status 1".into()),
            Some(Fault::Hang) => std::future::pending().await,
            None => Ok(()),
        }
    }
}
