//! Step abstraction for the build pipeline.

use crate::client::{ControlPlane, RemoteError};
use crate::config::{BuildSettings, BuildSpec};
use crate::error::{CoreError, Result};
use crate::provision::Provisioner;
use crate::state::BuildState;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Read-only inputs every step of one build can see.
#[derive(Clone)]
pub struct BuildContext {
    pub spec: Arc<BuildSpec>,
    pub settings: BuildSettings,
    pub client: Arc<dyn ControlPlane>,
    pub provisioner: Arc<dyn Provisioner>,
    pub cancel: CancellationToken,
}

impl BuildContext {
    /// Run a remote operation under the task timeout, giving up early if the
    /// build is cancelled.
    pub async fn remote<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, RemoteError>>,
    {
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                tracing::debug!(operation, "Remote operation abandoned on cancellation");
                Err(CoreError::Cancelled)
            }
            result = tokio::time::timeout(self.settings.task_timeout, call) => {
                flatten_timeout(operation, self.settings.task_timeout, result)
            }
        }
    }

    /// Run a remote operation under the task timeout only. Cleanup uses this
    /// so that cancelling a build never interrupts its own teardown.
    pub async fn remote_detached<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, RemoteError>>,
    {
        let result = tokio::time::timeout(self.settings.task_timeout, call).await;
        flatten_timeout(operation, self.settings.task_timeout, result)
    }

    /// Sleep, waking early with [`CoreError::Cancelled`] on cancellation.
    pub async fn wait(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Err(CoreError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

fn flatten_timeout<T>(
    operation: &'static str,
    after: Duration,
    result: std::result::Result<std::result::Result<T, RemoteError>, tokio::time::error::Elapsed>,
) -> Result<T> {
    match result {
        Ok(inner) => inner.map_err(CoreError::from),
        Err(_) => {
            tracing::warn!(operation, ?after, "Remote operation timed out");
            Err(CoreError::Timeout { operation, after })
        }
    }
}

/// One stage of a build.
///
/// `run` returning an error halts the pipeline. `cleanup` is called in
/// reverse order for every step whose `run` was entered, after the pipeline
/// stops for any reason, including success. Cleanup must inspect the state
/// to decide what, if anything, to undo, and reports problems through
/// [`BuildState`] rather than failing.
#[async_trait]
pub trait Step: Send {
    /// Short, stable name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> Result<()>;

    async fn cleanup(&mut self, _ctx: &BuildContext, _state: &mut BuildState) {}
}
