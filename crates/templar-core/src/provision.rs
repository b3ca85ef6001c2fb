//! Provisioning hook interface.

use crate::client::VmRef;
use async_trait::async_trait;

/// What the provisioning hook is pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionTarget {
    pub vm: VmRef,
    /// Guest address; `None` when the build has no connect section.
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// External guest provisioning (shell scripts, configuration management, ...).
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        target: &ProvisionTarget,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
