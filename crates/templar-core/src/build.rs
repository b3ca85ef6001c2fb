//! Build orchestration: one spec in, one artifact or one error out.

use crate::artifact::{Artifact, ArtifactKind};
use crate::client::ControlPlane;
use crate::config::{BuildFlavor, BuildSettings, BuildSpec};
use crate::error::{BuildError, CoreError};
use crate::provision::Provisioner;
use crate::runner::{RunOutcome, StepRunner};
use crate::state::BuildState;
use crate::step::{BuildContext, Step};
use crate::steps::{
    ConvertToTemplate, CreateVm, DiscoverCloneSource, Finalize, Provision, ResolveIsos, StartVm,
    UnmountMedia,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Pseudo step name for failures caught before the pipeline starts.
const VALIDATE: &str = "validate";

/// A single template build.
///
/// # Example
///
/// ```ignore
/// let build = Build::new(spec, client, provisioner)
///     .with_settings(BuildSettings::from_env());
/// let cancel = build.cancellation_token();
/// let artifact = build.run().await?;
/// println!("{}", artifact.description());
/// ```
pub struct Build {
    spec: Arc<BuildSpec>,
    client: Arc<dyn ControlPlane>,
    provisioner: Arc<dyn Provisioner>,
    settings: BuildSettings,
    cancel: CancellationToken,
}

impl Build {
    pub fn new(
        spec: BuildSpec,
        client: Arc<dyn ControlPlane>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            spec: Arc::new(spec),
            client,
            provisioner,
            settings: BuildSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: BuildSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Tie the build to an external token, e.g. a child of a shutdown token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this build when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spec(&self) -> &BuildSpec {
        &self.spec
    }

    /// The pipeline for this build's flavor, in execution order.
    pub fn steps(&self) -> Vec<Box<dyn Step>> {
        let mut steps: Vec<Box<dyn Step>> = Vec::with_capacity(8);
        if matches!(self.spec.flavor, BuildFlavor::Clone { .. }) {
            steps.push(Box::new(DiscoverCloneSource));
        }
        steps.push(Box::new(ResolveIsos));
        steps.push(Box::new(CreateVm));
        steps.push(Box::new(StartVm));
        steps.push(Box::new(Provision));
        steps.push(Box::new(UnmountMedia));
        steps.push(Box::new(ConvertToTemplate));
        steps.push(Box::new(Finalize));
        steps
    }

    /// Run the build to completion.
    ///
    /// On failure the error names the halting step and lists every cleanup
    /// action that did not complete.
    pub async fn run(self) -> Result<Artifact, BuildError> {
        if let Err(source) = self.spec.validate() {
            tracing::error!(name = %self.spec.name, error = %source, "Rejecting build");
            return Err(BuildError::StepFailed {
                step: VALIDATE,
                source,
                cleanup: Vec::new(),
            });
        }

        let mut state = BuildState::new(&self.spec);
        let span = tracing::info_span!(
            "build",
            build_id = %state.build_id(),
            name = %self.spec.name,
            node = %self.spec.node
        );
        let mut runner = StepRunner::new(self.steps());
        let ctx = BuildContext {
            spec: self.spec.clone(),
            settings: self.settings.clone(),
            client: self.client.clone(),
            provisioner: self.provisioner.clone(),
            cancel: self.cancel.clone(),
        };

        async move {
            tracing::info!(steps = ?runner.step_names(), "Starting build");
            let start = tokio::time::Instant::now();
            let outcome = runner.run(&ctx, &mut state).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            let cleanup = state.take_cleanup_failures();

            match outcome {
                RunOutcome::Completed => {
                    let vm = state.require_vm().map_err(|source| BuildError::StepFailed {
                        step: VALIDATE,
                        source,
                        cleanup: cleanup.clone(),
                    })?;
                    if !cleanup.is_empty() {
                        tracing::warn!(leftovers = cleanup.len(), "Build succeeded with cleanup failures");
                    }
                    let kind = if state.template_converted() {
                        ArtifactKind::Template
                    } else {
                        ArtifactKind::Vm
                    };
                    tracing::info!(vm = %vm, %kind, elapsed_ms, "Build succeeded");
                    Ok(Artifact::new(
                        vm,
                        kind,
                        state.build_id(),
                        ctx.client.clone(),
                        ctx.settings.task_timeout,
                    ))
                }
                RunOutcome::Halted { step } => {
                    let source = state
                        .take_error()
                        .unwrap_or(CoreError::MissingState("halting error"));
                    tracing::error!(step, error = %source, elapsed_ms, "Build failed");
                    Err(BuildError::StepFailed {
                        step,
                        source,
                        cleanup,
                    })
                }
                RunOutcome::Cancelled { step } => {
                    tracing::warn!(step, elapsed_ms, "Build cancelled");
                    Err(BuildError::Cancelled { step, cleanup })
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Run several builds with at most `max_parallel` in flight.
///
/// Builds share nothing but the control plane they were given. Results come
/// back in submission order.
pub async fn run_builds(
    builds: Vec<Build>,
    max_parallel: usize,
) -> Vec<Result<Artifact, BuildError>> {
    let permits = Arc::new(Semaphore::new(max_parallel.max(1)));
    tracing::info!(builds = builds.len(), max_parallel, "Running builds");

    let runs = builds.into_iter().map(|build| {
        let permits = permits.clone();
        async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            build.run().await
        }
    });
    futures::future::join_all(runs).await
}
