//! Resolve the guest address and run the provisioning hook.

use crate::error::{CoreError, Result};
use crate::host::resolve_host;
use crate::provision::ProvisionTarget;
use crate::state::{BuildPhase, BuildState};
use crate::step::{BuildContext, Step};
use async_trait::async_trait;

#[derive(Debug, Default)]
pub struct Provision;

#[async_trait]
impl Step for Provision {
    fn name(&self) -> &'static str {
        "provision"
    }

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> Result<()> {
        let vm = state.require_vm()?;

        let (host, port) = match &ctx.spec.connect {
            Some(connect) => {
                let host = resolve_host(ctx, &vm, &connect.host).await?;
                state.host = Some(host.clone());
                (Some(host), Some(connect.port))
            }
            None => {
                tracing::debug!(vm = %vm, "No guest connection configured");
                (None, None)
            }
        };

        let target = ProvisionTarget { vm, host, port };
        tracing::info!(vm = %target.vm, host = ?target.host, "Running provisioners");
        let start = tokio::time::Instant::now();
        tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => return Err(CoreError::Cancelled),
            result = ctx.provisioner.provision(&target) => result.map_err(CoreError::Provision)?,
        }
        tracing::info!(
            vm = %target.vm,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Provisioning complete"
        );

        state.advance(BuildPhase::Provisioned);
        Ok(())
    }
}
