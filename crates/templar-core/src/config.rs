//! Build configuration types.

use crate::error::CoreError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use templar_vm::{DiskSpec, IsoSpec, NicSpec, OsType};

/// Lowest identifier the cluster accepts for guests.
pub const MIN_VM_ID: u32 = 100;

/// Where a clone build copies from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneSourceRef {
    /// VM or template identifier on the build node.
    Id(u32),
    /// VM or template name; must match exactly one VM.
    Name(String),
}

/// How the VM's initial disk contents are obtained.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildFlavor {
    /// Fresh VM booted from install media.
    #[default]
    Iso,
    /// Copy of an existing VM or template.
    Clone {
        source: CloneSourceRef,
        /// Full copy rather than a linked clone
        #[serde(default = "default_full_clone")]
        full: bool,
    },
}

fn default_full_clone() -> bool {
    true
}

/// How the provisioning hook finds the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStrategy {
    /// Use the configured host as-is.
    Explicit(String),
    /// Ask the guest agent, optionally only on one interface.
    GuestAgent { interface: Option<String> },
}

/// Guest connection settings for provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectSpec {
    pub host: HostStrategy,
    pub port: u16,
}

impl Default for ConnectSpec {
    fn default() -> Self {
        Self {
            host: HostStrategy::GuestAgent { interface: None },
            port: 22,
        }
    }
}

/// Immutable description of one template build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    /// VM name while building
    pub name: String,
    /// Cluster node to build on
    pub node: String,
    /// Resource pool (optional)
    pub pool: Option<String>,
    /// Explicit identifier; `None` or `0` asks the cluster for one
    #[serde(default, deserialize_with = "zero_as_unset")]
    pub vm_id: Option<u32>,
    /// Stop and delete an existing VM with the explicit identifier first
    pub replace_existing: bool,
    /// Cores per socket (default: 1)
    pub cores: u8,
    /// Sockets (default: 1)
    pub sockets: u8,
    /// Memory in MiB (default: 512)
    pub memory_mib: u32,
    /// CPU model (default: kvm64)
    pub cpu_type: String,
    /// Guest OS hint
    pub os: OsType,
    /// Enable the guest agent channel (default: true)
    pub qemu_agent: bool,
    pub disks: Vec<DiskSpec>,
    pub isos: Vec<IsoSpec>,
    pub nics: Vec<NicSpec>,
    pub flavor: BuildFlavor,
    /// Guest connection for provisioning; `None` skips host resolution
    pub connect: Option<ConnectSpec>,
    /// Wait after power-on before connecting
    pub boot_wait: Duration,
    /// Leave the VM running instead of converting it
    pub skip_convert_to_template: bool,
    /// Final name (default: `name`)
    pub template_name: Option<String>,
    pub template_description: Option<String>,
    pub tags: Vec<String>,
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            node: String::new(),
            pool: None,
            vm_id: None,
            replace_existing: false,
            cores: 1,
            sockets: 1,
            memory_mib: 512,
            cpu_type: "kvm64".into(),
            os: OsType::default(),
            qemu_agent: true,
            disks: Vec::new(),
            isos: Vec::new(),
            nics: vec![NicSpec::default()],
            flavor: BuildFlavor::default(),
            connect: Some(ConnectSpec::default()),
            boot_wait: Duration::ZERO,
            skip_convert_to_template: false,
            template_name: None,
            template_description: None,
            tags: Vec::new(),
        }
    }
}

impl BuildSpec {
    /// Create a new spec builder.
    pub fn builder() -> BuildSpecBuilder {
        BuildSpecBuilder::default()
    }

    /// The caller-chosen identifier, if any. `0` counts as unset.
    pub fn explicit_id(&self) -> Option<u32> {
        self.vm_id.filter(|&id| id != 0)
    }

    /// Whether the caller chose the identifier.
    pub fn has_explicit_id(&self) -> bool {
        self.explicit_id().is_some()
    }

    /// Name the finished template or VM carries.
    pub fn final_name(&self) -> &str {
        self.template_name.as_deref().unwrap_or(&self.name)
    }

    /// Validate the specification.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::Config("name is required".into()));
        }
        if self.node.is_empty() {
            return Err(CoreError::Config("node is required".into()));
        }
        if self.cores == 0 || self.sockets == 0 {
            return Err(CoreError::Config("cores and sockets must be > 0".into()));
        }
        if self.memory_mib == 0 {
            return Err(CoreError::Config("memory_mib must be > 0".into()));
        }
        if let Some(id) = self.explicit_id() {
            if id < MIN_VM_ID {
                return Err(CoreError::Config(format!(
                    "vm_id must be >= {MIN_VM_ID}, got {id}"
                )));
            }
        }
        if self.replace_existing && !self.has_explicit_id() {
            return Err(CoreError::Config(
                "replace_existing requires an explicit vm_id".into(),
            ));
        }

        let mut pinned = HashSet::new();
        for iso in &self.isos {
            let Some(index) = iso.index else { continue };
            if index >= iso.bus.capacity() {
                return Err(CoreError::Config(format!(
                    "ISO pinned to {}{index}, but {} only has {} slots",
                    iso.bus,
                    iso.bus,
                    iso.bus.capacity()
                )));
            }
            if !pinned.insert((iso.bus, index)) {
                return Err(CoreError::Config(format!(
                    "more than one ISO pinned to {}{index}",
                    iso.bus
                )));
            }
        }

        match &self.flavor {
            BuildFlavor::Iso if self.disks.is_empty() => {
                Err(CoreError::Config("an ISO build needs at least one disk".into()))
            }
            BuildFlavor::Clone {
                source: CloneSourceRef::Name(name),
                ..
            } if name.is_empty() => Err(CoreError::Config("clone source name is empty".into())),
            _ => Ok(()),
        }
    }
}

fn zero_as_unset<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?.filter(|&id| id != 0))
}

/// Builder for BuildSpec.
#[derive(Debug, Default)]
pub struct BuildSpecBuilder {
    spec: BuildSpec,
}

impl BuildSpecBuilder {
    /// Set the VM name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }

    /// Set the cluster node.
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.spec.node = node.into();
        self
    }

    /// Set the resource pool.
    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.spec.pool = Some(pool.into());
        self
    }

    /// Set the VM identifier. `0` means "let the cluster pick".
    pub fn vm_id(mut self, id: u32) -> Self {
        self.spec.vm_id = (id != 0).then_some(id);
        self
    }

    /// Replace an existing VM with the same identifier.
    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.spec.replace_existing = replace;
        self
    }

    pub fn cores(mut self, cores: u8) -> Self {
        self.spec.cores = cores;
        self
    }

    pub fn sockets(mut self, sockets: u8) -> Self {
        self.spec.sockets = sockets;
        self
    }

    pub fn memory_mib(mut self, mib: u32) -> Self {
        self.spec.memory_mib = mib;
        self
    }

    pub fn cpu_type(mut self, cpu_type: impl Into<String>) -> Self {
        self.spec.cpu_type = cpu_type.into();
        self
    }

    pub fn os(mut self, os: OsType) -> Self {
        self.spec.os = os;
        self
    }

    pub fn qemu_agent(mut self, enabled: bool) -> Self {
        self.spec.qemu_agent = enabled;
        self
    }

    /// Add a disk.
    pub fn disk(mut self, disk: DiskSpec) -> Self {
        self.spec.disks.push(disk);
        self
    }

    /// Add an ISO.
    pub fn iso(mut self, iso: IsoSpec) -> Self {
        self.spec.isos.push(iso);
        self
    }

    /// Replace the network adapters.
    pub fn nics(mut self, nics: Vec<NicSpec>) -> Self {
        self.spec.nics = nics;
        self
    }

    /// Clone from an existing VM instead of booting install media.
    pub fn clone_from(mut self, source: CloneSourceRef, full: bool) -> Self {
        self.spec.flavor = BuildFlavor::Clone { source, full };
        self
    }

    /// Set the guest connection; `None` disables host resolution.
    pub fn connect(mut self, connect: Option<ConnectSpec>) -> Self {
        self.spec.connect = connect;
        self
    }

    pub fn boot_wait(mut self, wait: Duration) -> Self {
        self.spec.boot_wait = wait;
        self
    }

    pub fn skip_convert_to_template(mut self, skip: bool) -> Self {
        self.spec.skip_convert_to_template = skip;
        self
    }

    pub fn template_name(mut self, name: impl Into<String>) -> Self {
        self.spec.template_name = Some(name.into());
        self
    }

    pub fn template_description(mut self, description: impl Into<String>) -> Self {
        self.spec.template_description = Some(description.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.spec.tags.push(tag.into());
        self
    }

    /// Build the specification, validating all required fields.
    pub fn build(self) -> Result<BuildSpec, CoreError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

/// Ambient build settings shared by every build in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    /// Timeout applied to each remote operation.
    pub task_timeout: Duration,
    /// Interval between guest agent queries.
    pub agent_poll_interval: Duration,
    /// How long to wait for the guest agent to report an address.
    pub agent_timeout: Duration,
    /// Upper bound on builds running at the same time.
    pub max_parallel_builds: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(60),
            agent_poll_interval: Duration::from_millis(1000),
            agent_timeout: Duration::from_secs(300),
            max_parallel_builds: 4,
        }
    }
}

impl BuildSettings {
    /// Load settings from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TEMPLAR_TASK_TIMEOUT_SECS` | `60` |
    /// | `TEMPLAR_AGENT_POLL_MS` | `1000` |
    /// | `TEMPLAR_AGENT_TIMEOUT_SECS` | `300` |
    /// | `TEMPLAR_MAX_PARALLEL_BUILDS` | `4` |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            task_timeout: env_parse("TEMPLAR_TASK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.task_timeout),
            agent_poll_interval: env_parse("TEMPLAR_AGENT_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.agent_poll_interval),
            agent_timeout: env_parse("TEMPLAR_AGENT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.agent_timeout),
            max_parallel_builds: env_parse("TEMPLAR_MAX_PARALLEL_BUILDS")
                .map(|n: u64| n.max(1) as usize)
                .unwrap_or(default.max_parallel_builds),
        }
    }
}

fn env_parse(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use templar_vm::{BusFamily, IsoSource};

    fn minimal() -> BuildSpecBuilder {
        BuildSpec::builder()
            .name("debian-12")
            .node("pve1")
            .disk(DiskSpec::new(BusFamily::Scsi, "local-lvm", 10))
    }

    #[test]
    fn test_spec_defaults() {
        let spec = BuildSpec::default();
        assert_eq!(spec.cores, 1);
        assert_eq!(spec.memory_mib, 512);
        assert!(spec.vm_id.is_none());
        assert!(spec.qemu_agent);
        assert_eq!(spec.flavor, BuildFlavor::Iso);
    }

    #[test]
    fn test_builder_success() {
        let spec = minimal()
            .vm_id(120)
            .cores(4)
            .memory_mib(4096)
            .template_name("debian-12-base")
            .tag("linux")
            .build()
            .expect("should build successfully");
        assert_eq!(spec.vm_id, Some(120));
        assert_eq!(spec.final_name(), "debian-12-base");
        assert_eq!(spec.tags, vec!["linux".to_string()]);
    }

    #[test]
    fn test_zero_vm_id_means_allocate() {
        let spec = minimal().vm_id(0).build().unwrap();
        assert!(!spec.has_explicit_id());
        assert_eq!(spec.final_name(), "debian-12");
    }

    #[test]
    fn test_zero_vm_id_in_literal_and_json() {
        let literal = BuildSpec {
            vm_id: Some(0),
            ..minimal().build().unwrap()
        };
        assert!(literal.validate().is_ok());
        assert_eq!(literal.explicit_id(), None);

        let mut value = serde_json::to_value(minimal().vm_id(150).build().unwrap()).unwrap();
        value["vm_id"] = serde_json::json!(0);
        let decoded: BuildSpec = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.vm_id, None);
        assert!(decoded.validate().is_ok());
    }

    #[test]
    fn test_builder_validation_missing_node() {
        let result = BuildSpec::builder()
            .name("x")
            .disk(DiskSpec::new(BusFamily::Scsi, "local-lvm", 10))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_validation_low_vm_id() {
        assert!(minimal().vm_id(99).build().is_err());
    }

    #[test]
    fn test_replace_requires_explicit_id() {
        assert!(minimal().replace_existing(true).build().is_err());
        assert!(minimal().vm_id(150).replace_existing(true).build().is_ok());
    }

    #[test]
    fn test_iso_build_requires_disk() {
        let result = BuildSpec::builder().name("x").node("pve1").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_clone_build_without_disks() {
        let spec = BuildSpec::builder()
            .name("x")
            .node("pve1")
            .clone_from(CloneSourceRef::Name("base".into()), true)
            .build()
            .unwrap();
        assert!(matches!(spec.flavor, BuildFlavor::Clone { full: true, .. }));
    }

    #[test]
    fn test_duplicate_pinned_isos_rejected() {
        let iso = IsoSpec::pinned(BusFamily::Ide, 2, IsoSource::volume("local:iso/a.iso"));
        let result = minimal().iso(iso.clone()).iso(iso).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_pinned_iso_out_of_range_rejected() {
        let iso = IsoSpec::pinned(BusFamily::Sata, 6, IsoSource::volume("local:iso/a.iso"));
        assert!(minimal().iso(iso).build().is_err());
    }

    #[test]
    fn test_settings_from_env_uses_defaults() {
        std::env::remove_var("TEMPLAR_TASK_TIMEOUT_SECS");
        std::env::remove_var("TEMPLAR_AGENT_POLL_MS");
        std::env::remove_var("TEMPLAR_AGENT_TIMEOUT_SECS");
        std::env::remove_var("TEMPLAR_MAX_PARALLEL_BUILDS");

        assert_eq!(BuildSettings::from_env(), BuildSettings::default());
    }
}
