//! Guest address resolution.

use crate::client::{GuestInterface, VmRef};
use crate::config::HostStrategy;
use crate::error::{CoreError, Result};
use crate::step::BuildContext;
use std::net::IpAddr;

/// Pick the address the provisioner should connect to.
///
/// Loopback interfaces and addresses are skipped. With `interface` set, only
/// that interface is considered. The first IPv4 address wins; otherwise the
/// first IPv6 address is used.
pub fn select_address(interfaces: &[GuestInterface], interface: Option<&str>) -> Option<IpAddr> {
    let mut fallback = None;
    for iface in interfaces {
        if let Some(wanted) = interface {
            if iface.name != wanted {
                continue;
            }
        } else if iface.name == "lo" {
            continue;
        }
        for addr in iface.addresses.iter().filter(|addr| !addr.is_loopback()) {
            match addr {
                IpAddr::V4(_) => return Some(*addr),
                IpAddr::V6(_) => {
                    fallback.get_or_insert(*addr);
                }
            }
        }
    }
    fallback
}

/// Resolve the host for `vm` according to `strategy`.
///
/// The guest-agent strategy polls until an address shows up, the agent
/// timeout passes, or the build is cancelled. Agent errors while polling are
/// expected during boot and only logged.
pub async fn resolve_host(ctx: &BuildContext, vm: &VmRef, strategy: &HostStrategy) -> Result<String> {
    let interface = match strategy {
        HostStrategy::Explicit(host) => {
            tracing::debug!(vm = %vm, host = %host, "Using configured host");
            return Ok(host.clone());
        }
        HostStrategy::GuestAgent { interface } => interface.as_deref(),
    };

    let start = tokio::time::Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match ctx
            .remote("query guest interfaces", ctx.client.guest_interfaces(vm))
            .await
        {
            Ok(interfaces) => {
                if let Some(addr) = select_address(&interfaces, interface) {
                    tracing::info!(
                        vm = %vm,
                        %addr,
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Guest address found"
                    );
                    return Ok(addr.to_string());
                }
                tracing::trace!(vm = %vm, attempt = attempts, "No usable guest address yet");
            }
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(e) => {
                tracing::trace!(vm = %vm, error = %e, attempt = attempts, "Guest agent query failed, retrying...");
            }
        }

        if start.elapsed() >= ctx.settings.agent_timeout {
            tracing::warn!(vm = %vm, attempts, "Timed out waiting for guest address");
            return Err(CoreError::NoGuestAddress {
                vm_id: vm.vm_id(),
                after: ctx.settings.agent_timeout,
            });
        }
        ctx.wait(ctx.settings.agent_poll_interval).await?;
    }
}
