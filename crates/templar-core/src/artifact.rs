//! Build artifact: the template or VM a successful build leaves behind.

use crate::client::{ControlPlane, VmRef};
use crate::error::{CoreError, Result};
use crate::state::BuildId;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What kind of object the artifact wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Template,
    Vm,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template => write!(f, "template"),
            Self::Vm => write!(f, "VM"),
        }
    }
}

/// Result of a successful build.
pub struct Artifact {
    vm: VmRef,
    kind: ArtifactKind,
    created_at: DateTime<Utc>,
    state: Map<String, Value>,
    client: Arc<dyn ControlPlane>,
    timeout: Duration,
}

impl Artifact {
    pub(crate) fn new(
        vm: VmRef,
        kind: ArtifactKind,
        build_id: BuildId,
        client: Arc<dyn ControlPlane>,
        timeout: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let mut state = Map::new();
        state.insert("vm_id".into(), Value::from(vm.vm_id()));
        state.insert("node".into(), Value::from(vm.node()));
        state.insert(
            "pool".into(),
            vm.pool().map(Value::from).unwrap_or(Value::Null),
        );
        state.insert("kind".into(), Value::from(kind.to_string()));
        state.insert("build_id".into(), Value::from(build_id.to_string()));
        state.insert("created_at".into(), Value::from(created_at.to_rfc3339()));

        Self {
            vm,
            kind,
            created_at,
            state,
            client,
            timeout,
        }
    }

    /// Stable identifier: the numeric VM/template ID.
    pub fn id(&self) -> String {
        self.vm.vm_id().to_string()
    }

    /// Human-readable summary.
    pub fn description(&self) -> String {
        format!("A {} was created: {}", self.kind, self.vm.vm_id())
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn vm(&self) -> &VmRef {
        &self.vm
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Opaque state for downstream consumers.
    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    /// Look up one state entry.
    pub fn state_value(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Delete the wrapped VM or template, giving up after the build's task
    /// timeout.
    pub async fn destroy(&self) -> Result<()> {
        tracing::info!(vm = %self.vm, kind = %self.kind, "Destroying artifact");
        match tokio::time::timeout(self.timeout, self.client.delete_vm(&self.vm)).await {
            Ok(result) => result.map_err(CoreError::from),
            Err(_) => {
                tracing::warn!(vm = %self.vm, after = ?self.timeout, "Artifact delete timed out");
                Err(CoreError::Timeout {
                    operation: "delete artifact",
                    after: self.timeout,
                })
            }
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("vm", &self.vm)
            .field("kind", &self.kind)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
