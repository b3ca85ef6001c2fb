//! Power on the VM and wait out the boot delay.

use crate::error::Result;
use crate::state::{BuildPhase, BuildState};
use crate::step::{BuildContext, Step};
use async_trait::async_trait;

#[derive(Debug, Default)]
pub struct StartVm;

#[async_trait]
impl Step for StartVm {
    fn name(&self) -> &'static str {
        "start-vm"
    }

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> Result<()> {
        let vm = state.require_vm()?;
        tracing::info!(vm = %vm, "Starting VM");
        ctx.remote("start VM", ctx.client.start_vm(&vm)).await?;
        state.advance(BuildPhase::Started);

        if !ctx.spec.boot_wait.is_zero() {
            tracing::debug!(vm = %vm, boot_wait = ?ctx.spec.boot_wait, "Waiting for boot");
            ctx.wait(ctx.spec.boot_wait).await?;
        }
        Ok(())
    }
}
