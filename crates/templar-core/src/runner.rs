//! Sequential step runner with reverse-order cleanup.

use crate::error::CoreError;
use crate::state::{BuildPhase, BuildState};
use crate::step::{BuildContext, Step};

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step ran to completion.
    Completed,
    /// A step halted; its error is in the build state.
    Halted { step: &'static str },
    /// Cancellation was observed while running or before starting `step`.
    Cancelled { step: &'static str },
}

/// Runs steps one at a time, in order, then cleans up.
pub struct StepRunner {
    steps: Vec<Box<dyn Step>>,
}

impl StepRunner {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Execute the pipeline.
    ///
    /// A step runs only if every earlier step succeeded. Cancellation is
    /// checked before each step and surfaces from inside a step as
    /// [`CoreError::Cancelled`]. Once the pipeline stops, every step that was
    /// entered gets its cleanup call, last one first.
    pub async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState) -> RunOutcome {
        let build_id = state.build_id();
        let mut entered = 0;
        let mut outcome = RunOutcome::Completed;

        for step in self.steps.iter_mut() {
            let name = step.name();
            if ctx.cancel.is_cancelled() {
                tracing::info!(%build_id, step = name, "Build cancelled between steps");
                state.cancel();
                outcome = RunOutcome::Cancelled { step: name };
                break;
            }

            entered += 1;
            let start = tokio::time::Instant::now();
            tracing::debug!(%build_id, step = name, "Running step");
            match step.run(ctx, state).await {
                Ok(()) => {
                    tracing::debug!(
                        %build_id,
                        step = name,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Step completed"
                    );
                }
                Err(CoreError::Cancelled) => {
                    tracing::info!(%build_id, step = name, "Build cancelled during step");
                    state.cancel();
                    outcome = RunOutcome::Cancelled { step: name };
                    break;
                }
                Err(e) => {
                    tracing::error!(%build_id, step = name, error = %e, "Step failed, halting build");
                    state.halt(e);
                    outcome = RunOutcome::Halted { step: name };
                    break;
                }
            }
        }

        if outcome == RunOutcome::Completed {
            state.advance(BuildPhase::Succeeded);
        }

        for step in self.steps[..entered].iter_mut().rev() {
            tracing::trace!(%build_id, step = step.name(), "Cleaning up step");
            step.cleanup(ctx, state).await;
        }

        outcome
    }
}
