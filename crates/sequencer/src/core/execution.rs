//! Phase list execution.
//!
//! The [`Executor`] owns the run-time half of a sequence: it claims the
//! runtime, emits the start event, walks phases and batches in order and
//! turns the first task failure into the sequence's terminal error.

use futures::FutureExt;
use machined_core::Sequence;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SequencerError, TaskError, TaskResult};
use crate::resources::SequenceGuard;
use crate::runtime::Runtime;

use super::phase::{summarize, Phase, PhaseSummary, Task, TaskContext};

type TaskOutcome = (String, std::result::Result<TaskResult, String>);

/// Runs phase lists produced by a planner.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor;

impl Executor {
    pub fn new() -> Self {
        Self
    }

    /// Snapshot of a plan, for logs and CLI output.
    pub fn plan_summary(phases: &[Phase]) -> Vec<PhaseSummary> {
        summarize(phases)
    }

    /// Execute `phases` for `sequence`.
    ///
    /// Fails fast with [`SequencerError::SequenceInProgress`] when another
    /// sequence holds the runtime. Otherwise behaves as
    /// [`run_with_guard`](Self::run_with_guard).
    pub async fn run(
        &self,
        sequence: Sequence,
        runtime: &Arc<Runtime>,
        phases: Vec<Phase>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let guard = runtime.begin_sequence(sequence)?;
        self.run_with_guard(guard, runtime, phases, cancel).await
    }

    /// Execute `phases` under a claim already taken on `runtime`.
    ///
    /// Emits `SequenceStart`, runs every phase in order and stops at the first
    /// failing task. On failure the runtime is released, a single
    /// `FatalSequencerError` is emitted and the error returned.
    pub async fn run_with_guard(
        &self,
        mut guard: SequenceGuard,
        runtime: &Arc<Runtime>,
        phases: Vec<Phase>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let sequence = guard.sequence();
        runtime.events().sequence_start(sequence);

        info!(
            sequence = %sequence,
            phases = phases.len(),
            "Sequence started"
        );
        let started = Instant::now();

        let outcome = self
            .run_phases(sequence, runtime, &phases, &cancel, &guard)
            .await;

        match &outcome {
            Ok(()) => {
                guard.mark_completed();
                info!(
                    sequence = %sequence,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sequence completed"
                );
            }
            Err(e) => {
                error!(
                    sequence = %sequence,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sequence failed"
                );
                guard.mark_failed(e);
            }
        }

        outcome
    }

    async fn run_phases(
        &self,
        sequence: Sequence,
        runtime: &Arc<Runtime>,
        phases: &[Phase],
        cancel: &CancellationToken,
        guard: &SequenceGuard,
    ) -> Result<()> {
        for (index, phase) in phases.iter().enumerate() {
            guard.advance(index, phase.name());
            info!(
                sequence = %sequence,
                phase = phase.name(),
                index,
                tasks = phase.tasks().len(),
                "Phase started"
            );

            // Siblings are cancelled through this token without touching the caller's.
            let phase_cancel = cancel.child_token();
            for batch in phase.batches() {
                if cancel.is_cancelled() {
                    return Err(SequencerError::Cancelled {
                        phase: phase.name().to_string(),
                        task: None,
                    });
                }
                run_batch(sequence, runtime, phase.name(), batch, &phase_cancel).await?;
            }

            debug!(sequence = %sequence, phase = phase.name(), "Phase completed");
        }

        Ok(())
    }
}

/// Run one batch to its join barrier.
///
/// The first failure cancels `cancel` so remaining siblings can stop early;
/// they are still awaited, but their outcomes no longer affect the result.
async fn run_batch(
    sequence: Sequence,
    runtime: &Arc<Runtime>,
    phase: &str,
    batch: &[Task],
    cancel: &CancellationToken,
) -> Result<()> {
    let mut set: JoinSet<TaskOutcome> = JoinSet::new();

    for task in batch {
        let task = task.clone();
        let ctx = TaskContext::new(sequence, phase, task.name(), cancel.clone());
        let runtime = Arc::clone(runtime);
        debug!(
            sequence = %sequence,
            phase,
            task = task.name(),
            mode = ?task.mode(),
            "Task started"
        );

        set.spawn(async move {
            let name = task.name().to_string();
            let outcome = AssertUnwindSafe(async move { task.run(ctx, runtime).await })
                .catch_unwind()
                .await
                .map_err(panic_message);
            (name, outcome)
        });
    }

    let mut failure: Option<SequencerError> = None;

    while let Some(joined) = set.join_next().await {
        let error = match joined {
            Ok((name, Ok(Ok(())))) => {
                debug!(sequence = %sequence, phase, task = %name, "Task completed");
                continue;
            }
            Ok((name, Ok(Err(e)))) => task_error(phase, name, e),
            Ok((name, Err(message))) => SequencerError::TaskPanicked {
                phase: phase.to_string(),
                task: name,
                message,
            },
            Err(e) => SequencerError::TaskPanicked {
                phase: phase.to_string(),
                task: "<unknown>".to_string(),
                message: e.to_string(),
            },
        };

        if failure.is_some() {
            debug!(sequence = %sequence, phase, error = %error, "Discarding sibling outcome");
            continue;
        }

        warn!(sequence = %sequence, phase, error = %error, "Task failed, cancelling siblings");
        cancel.cancel();
        failure = Some(error);
    }

    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn task_error(phase: &str, task: String, error: TaskError) -> SequencerError {
    if error.is_cancelled() {
        SequencerError::Cancelled {
            phase: phase.to_string(),
            task: Some(task),
        }
    } else {
        SequencerError::TaskFailed {
            phase: phase.to_string(),
            task,
            source: error,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
