//! Turn uploaded and downloaded ISO sources into store volumes.

use crate::error::{CleanupFailure, Result};
use crate::state::BuildState;
use crate::step::{BuildContext, Step};
use async_trait::async_trait;
use templar_vm::IsoSource;

/// Uploads local ISOs and has the node fetch remote ones, so that every ISO
/// the create step sees is backed by a store volume.
///
/// Volumes created here are deleted again if the build does not succeed.
#[derive(Debug, Default)]
pub struct ResolveIsos;

#[async_trait]
impl Step for ResolveIsos {
    fn name(&self) -> &'static str {
        "resolve-isos"
    }

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> Result<()> {
        let node = ctx.spec.node.as_str();
        for n in 0..state.isos.len() {
            let volume = match &state.isos[n].source {
                IsoSource::Upload { path, storage } => {
                    tracing::info!(iso = n, path = %path.display(), storage = %storage, "Uploading ISO");
                    ctx.remote("upload ISO", ctx.client.upload_iso(node, storage, path))
                        .await?
                }
                IsoSource::Download {
                    url,
                    checksum,
                    storage,
                } => {
                    tracing::info!(iso = n, url = %url, storage = %storage, "Downloading ISO");
                    ctx.remote(
                        "download ISO",
                        ctx.client
                            .download_iso(node, storage, url, checksum.as_deref()),
                    )
                    .await?
                }
                IsoSource::Volume { .. } | IsoSource::CloudInit { .. } => continue,
            };
            tracing::debug!(iso = n, volume = %volume, "ISO available in storage");
            state.created_volumes.push(volume.clone());
            state.isos[n].source = IsoSource::Volume { path: volume };
        }
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &BuildContext, state: &mut BuildState) {
        if state.succeeded() || state.created_volumes.is_empty() {
            return;
        }
        let node = ctx.spec.node.clone();
        for volume in std::mem::take(&mut state.created_volumes) {
            tracing::info!(volume = %volume, "Removing ISO volume");
            if let Err(e) = ctx
                .remote_detached("delete volume", ctx.client.delete_volume(&node, &volume))
                .await
            {
                state.push_cleanup_failure(CleanupFailure::new("delete volume", &volume, e));
            }
        }
    }
}
