//! Final metadata pass over the finished template or VM.

use crate::client::{ConfigChange, VmConfig};
use crate::config::BuildSpec;
use crate::error::Result;
use crate::state::{BuildPhase, BuildState};
use crate::step::{BuildContext, Step};
use async_trait::async_trait;

/// Prefix of configuration keys for detached volumes.
const UNUSED_PREFIX: &str = "unused";

/// Applies the final name, description and tags, and drops references to
/// detached volumes.
#[derive(Debug, Default)]
pub struct Finalize;

impl Finalize {
    fn change(spec: &BuildSpec, current: &VmConfig) -> ConfigChange {
        let mut change = ConfigChange::new();
        change.set("name", spec.final_name());
        if let Some(description) = &spec.template_description {
            change.set("description", description.as_str());
        }
        if !spec.tags.is_empty() {
            change.set("tags", spec.tags.join(";"));
        }
        for key in current.keys().filter(|key| key.starts_with(UNUSED_PREFIX)) {
            change.delete(key.as_str());
        }
        change
    }
}

#[async_trait]
impl Step for Finalize {
    fn name(&self) -> &'static str {
        "finalize"
    }

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> Result<()> {
        let vm = state.require_vm()?;
        let current = ctx
            .remote("read VM config", ctx.client.get_config(&vm))
            .await?;

        let change = Self::change(&ctx.spec, &current);
        if !change.is_empty() {
            tracing::info!(
                vm = %vm,
                name = ctx.spec.final_name(),
                dropped = change.delete.len(),
                "Finalizing"
            );
            ctx.remote("finalize VM config", ctx.client.set_config(&vm, &change))
                .await?;
        }

        state.advance(BuildPhase::Finalized);
        Ok(())
    }
}
