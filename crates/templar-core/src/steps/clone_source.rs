//! Locate the clone source and record the slots it already uses.

use crate::client::VmRef;
use crate::config::{BuildFlavor, CloneSourceRef};
use crate::error::{CoreError, Result};
use crate::state::BuildState;
use crate::step::{BuildContext, Step};
use async_trait::async_trait;
use templar_vm::{AllocationErrors, Slot};

#[derive(Debug, Default)]
pub struct DiscoverCloneSource;

#[async_trait]
impl Step for DiscoverCloneSource {
    fn name(&self) -> &'static str {
        "discover-clone-source"
    }

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> Result<()> {
        let BuildFlavor::Clone { source, .. } = &ctx.spec.flavor else {
            return Ok(());
        };

        let vm = match source {
            CloneSourceRef::Id(id) => VmRef::new(*id, ctx.spec.node.clone(), None),
            CloneSourceRef::Name(name) => {
                let mut matches = ctx
                    .remote("list VMs by name", ctx.client.list_by_name(name))
                    .await?;
                if matches.len() != 1 {
                    return Err(CoreError::CloneSource(format!(
                        "expected exactly one VM named '{name}', found {}",
                        matches.len()
                    )));
                }
                matches.remove(0)
            }
        };

        let config = match ctx.remote("read clone source config", ctx.client.get_config(&vm)).await {
            Err(CoreError::Remote(e)) if e.is_not_found() => {
                return Err(CoreError::CloneSource(format!("VM {vm} does not exist")));
            }
            other => other?,
        };

        let mut malformed = Vec::new();
        for key in config.keys() {
            match Slot::from_config_key(key) {
                Some(Ok(slot)) => {
                    state.occupied.insert(slot);
                }
                Some(Err(e)) => malformed.push(e),
                None => {}
            }
        }
        if !malformed.is_empty() {
            return Err(AllocationErrors::from_errors(malformed).into());
        }

        tracing::info!(
            source = %vm,
            occupied = state.occupied.len(),
            "Clone source resolved"
        );
        state.clone_source = Some(vm);
        Ok(())
    }
}
