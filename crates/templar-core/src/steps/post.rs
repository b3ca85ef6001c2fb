//! Post-provisioning steps: boot media removal and template conversion.

use crate::client::ConfigChange;
use crate::error::{CoreError, Result};
use crate::state::BuildState;
use crate::step::{BuildContext, Step};
use async_trait::async_trait;

/// Empty CD-ROM device left behind when media is ejected but the drive kept.
const EMPTY_CDROM: &str = "none,media=cdrom";

/// Detaches boot media and the transient cloud-init drive.
///
/// Slots come from the device map recorded at creation, so this finds the
/// same slots the media was placed in.
#[derive(Debug, Default)]
pub struct UnmountMedia;

impl UnmountMedia {
    fn change(state: &BuildState) -> Result<ConfigChange> {
        let mut change = ConfigChange::new();
        if state.isos.is_empty() {
            return Ok(change);
        }
        let devices = state
            .devices
            .as_ref()
            .ok_or(CoreError::MissingState("device map"))?;

        for (n, iso) in state.isos.iter().enumerate() {
            let slot = devices
                .iso_slot(n)
                .ok_or(CoreError::MissingState("ISO slot"))?;
            if iso.source.is_cloud_init() {
                if !iso.keep_device {
                    change.delete(slot.to_string());
                }
                continue;
            }
            if !iso.unmount {
                continue;
            }
            if iso.keep_device {
                change.set(slot.to_string(), EMPTY_CDROM);
            } else {
                change.delete(slot.to_string());
            }
        }
        Ok(change)
    }
}

#[async_trait]
impl Step for UnmountMedia {
    fn name(&self) -> &'static str {
        "unmount-media"
    }

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> Result<()> {
        let change = Self::change(state)?;
        if change.is_empty() {
            return Ok(());
        }
        let vm = state.require_vm()?;
        tracing::info!(
            vm = %vm,
            emptied = ?change.set.keys().collect::<Vec<_>>(),
            removed = ?change.delete,
            "Detaching boot media"
        );
        ctx.remote("detach media", ctx.client.set_config(&vm, &change))
            .await
    }
}

/// Stops the VM and turns it into a template, unless configured to leave
/// it running.
#[derive(Debug, Default)]
pub struct ConvertToTemplate;

#[async_trait]
impl Step for ConvertToTemplate {
    fn name(&self) -> &'static str {
        "convert-to-template"
    }

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> Result<()> {
        let vm = state.require_vm()?;
        if ctx.spec.skip_convert_to_template {
            tracing::info!(vm = %vm, "Leaving VM running, template conversion skipped");
            return Ok(());
        }

        tracing::info!(vm = %vm, "Stopping VM for conversion");
        ctx.remote("stop VM", ctx.client.stop_vm(&vm)).await?;
        tracing::info!(vm = %vm, "Converting VM to template");
        ctx.remote("convert to template", ctx.client.convert_to_template(&vm))
            .await?;
        state.mark_template_converted();
        Ok(())
    }
}
