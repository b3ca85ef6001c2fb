//! Allocate devices and create the VM.

use crate::client::VmRef;
use crate::config::BuildFlavor;
use crate::error::{CleanupFailure, CoreError, Result};
use crate::retry::{DuplicateIdRetry, RetryDecision};
use crate::state::BuildState;
use crate::step::{BuildContext, Step};
use async_trait::async_trait;
use templar_vm::{allocate, CloneFrom, CreateRequest, DeviceMap};

/// Creates the build VM.
///
/// Devices are allocated before any remote call, so an allocation failure
/// never leaves anything on the cluster. Cleanup stops and deletes the VM
/// unless the build succeeded or the VM already became the template.
#[derive(Debug, Default)]
pub struct CreateVm;

impl CreateVm {
    async fn replace_existing(ctx: &BuildContext, vm_id: u32) -> Result<()> {
        let existing = VmRef::new(vm_id, ctx.spec.node.clone(), None);
        match ctx
            .remote("look up existing VM", ctx.client.get_config(&existing))
            .await
        {
            Ok(_) => {}
            Err(CoreError::Remote(e)) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }

        tracing::info!(vm = %existing, "Replacing existing VM");
        ctx.remote("stop existing VM", ctx.client.stop_vm(&existing))
            .await?;
        ctx.remote("delete existing VM", ctx.client.delete_vm(&existing))
            .await?;
        Ok(())
    }

    fn request(
        ctx: &BuildContext,
        state: &BuildState,
        vm_id: u32,
        devices: &DeviceMap,
    ) -> Result<CreateRequest> {
        let spec = &ctx.spec;
        let mut builder = CreateRequest::builder(vm_id, spec.node.clone())
            .name(spec.name.clone())
            .pool(spec.pool.clone())
            .cores(spec.cores)
            .sockets(spec.sockets)
            .memory_mib(spec.memory_mib)
            .cpu_type(spec.cpu_type.clone())
            .os(spec.os)
            .qemu_agent(spec.qemu_agent)
            .nics(spec.nics.clone())
            .devices(devices.clone());

        if let BuildFlavor::Clone { full, .. } = &ctx.spec.flavor {
            let source = state
                .clone_source
                .as_ref()
                .ok_or(CoreError::MissingState("clone source"))?;
            builder = builder.clone_from(CloneFrom {
                vm_id: source.vm_id(),
                node: source.node().to_string(),
                full: *full,
            });
        }

        Ok(builder.build()?)
    }
}

#[async_trait]
impl Step for CreateVm {
    fn name(&self) -> &'static str {
        "create-vm"
    }

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> Result<()> {
        let spec = &ctx.spec;

        let allocation = allocate(&spec.disks, &state.isos, &state.occupied)?;
        for warning in &allocation.warnings {
            tracing::warn!(build_id = %state.build_id(), %warning, "Device allocation warning");
        }
        for (slot, device) in allocation.devices.iter() {
            tracing::debug!(%slot, device = %device.config_value(), "Device allocated");
        }
        state.allocation_warnings = allocation.warnings;
        let devices = allocation.devices;

        if let (Some(vm_id), true) = (spec.explicit_id(), spec.replace_existing) {
            Self::replace_existing(ctx, vm_id).await?;
        }

        let policy = DuplicateIdRetry::new(spec.has_explicit_id());
        let mut attempt = 0;
        let vm = loop {
            attempt += 1;
            let vm_id = match spec.explicit_id() {
                Some(id) => id,
                None => {
                    ctx.remote("get next free VM id", ctx.client.next_free_id())
                        .await?
                }
            };
            let request = Self::request(ctx, state, vm_id, &devices)?;

            tracing::info!(vm_id, node = %spec.node, attempt, "Creating VM");
            match ctx
                .remote("create VM", ctx.client.create_vm(&request))
                .await
            {
                Ok(vm) => break vm,
                Err(e) => match policy.decide(attempt, e) {
                    RetryDecision::Retry => {
                        tracing::warn!(vm_id, attempt, "VM id taken concurrently, retrying with a new one");
                    }
                    RetryDecision::GiveUp(e) => return Err(e),
                },
            }
        };

        tracing::info!(vm = %vm, "VM created");
        state.devices = Some(devices);
        state.record_vm(vm);
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &BuildContext, state: &mut BuildState) {
        let Some(vm) = state.vm().cloned() else {
            return;
        };
        if state.succeeded() {
            return;
        }
        if state.template_converted() {
            tracing::info!(vm = %vm, "Keeping converted template after failure");
            return;
        }

        tracing::info!(vm = %vm, "Stopping VM");
        if let Err(e) = ctx
            .remote_detached("stop VM", ctx.client.stop_vm(&vm))
            .await
        {
            state.push_cleanup_failure(CleanupFailure::new("stop and delete VM", &vm, e));
            return;
        }

        tracing::info!(vm = %vm, "Deleting VM");
        if let Err(e) = ctx
            .remote_detached("delete VM", ctx.client.delete_vm(&vm))
            .await
        {
            state.push_cleanup_failure(CleanupFailure::new("delete VM", &vm, e));
        }
    }
}
