//! Phase and task types for sequence execution.
//!
//! A sequence expands into an ordered list of [`Phase`]s; each phase holds
//! [`Task`]s whose [`TaskMode`] decides whether they may overlap with their
//! neighbours.

use futures::future::BoxFuture;
use machined_core::Sequence;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{TaskError, TaskResult};
use crate::runtime::Runtime;

/// Concurrency classification of a task within its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Runs alone: after every earlier task of the phase, before every later one.
    Exclusive,
    /// Runs in parallel with adjacent concurrent tasks of the same phase.
    Concurrent,
}

/// Per-invocation context handed to every task.
#[derive(Clone)]
pub struct TaskContext {
    pub sequence: Sequence,
    pub phase: String,
    pub task: String,
    /// Cancelled when the caller aborts the sequence or a sibling task fails
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(
        sequence: Sequence,
        phase: impl Into<String>,
        task: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sequence,
            phase: phase.into(),
            task: task.into(),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Fail with [`TaskError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("sequence", &self.sequence)
            .field("phase", &self.phase)
            .field("task", &self.task)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

pub type TaskFn =
    Arc<dyn Fn(TaskContext, Arc<Runtime>) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// The smallest unit of execution: one side effect against the runtime.
#[derive(Clone)]
pub struct Task {
    name: String,
    mode: TaskMode,
    func: TaskFn,
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, mode: TaskMode, func: F) -> Self
    where
        F: Fn(TaskContext, Arc<Runtime>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            mode,
            func: Arc::new(move |ctx, runtime| Box::pin(func(ctx, runtime))),
        }
    }

    pub fn exclusive<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskContext, Arc<Runtime>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self::new(name, TaskMode::Exclusive, func)
    }

    pub fn concurrent<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskContext, Arc<Runtime>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self::new(name, TaskMode::Concurrent, func)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> TaskMode {
        self.mode
    }

    /// Start the task body.
    pub fn run(&self, ctx: TaskContext, runtime: Arc<Runtime>) -> BoxFuture<'static, TaskResult> {
        (self.func)(ctx, runtime)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// An ordered, named group of tasks.
#[derive(Debug, Clone)]
pub struct Phase {
    name: String,
    tasks: Vec<Task>,
}

impl Phase {
    pub fn new(name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            tasks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(Task::name).collect()
    }

    /// Split the tasks into execution batches.
    ///
    /// Each run of consecutive concurrent tasks becomes one batch; every
    /// exclusive task is a batch of its own. Batches keep declaration order.
    pub fn batches(&self) -> Vec<&[Task]> {
        let mut batches = Vec::new();
        let mut start = 0;

        for (index, task) in self.tasks.iter().enumerate() {
            if task.mode == TaskMode::Exclusive {
                if start < index {
                    batches.push(&self.tasks[start..index]);
                }
                batches.push(&self.tasks[index..=index]);
                start = index + 1;
            }
        }
        if start < self.tasks.len() {
            batches.push(&self.tasks[start..]);
        }

        batches
    }

    pub fn summary(&self) -> PhaseSummary {
        PhaseSummary {
            name: self.name.clone(),
            tasks: self
                .tasks
                .iter()
                .map(|task| TaskSummary {
                    name: task.name.clone(),
                    mode: task.mode,
                })
                .collect(),
        }
    }
}

/// Builder for a sequence's phase list.
#[derive(Debug, Default)]
pub struct PhaseList {
    phases: Vec<Phase>,
}

impl PhaseList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(mut self, name: impl Into<String>, tasks: Vec<Task>) -> Self {
        self.phases.push(Phase::new(name, tasks));
        self
    }

    pub fn append_when(self, condition: bool, name: impl Into<String>, tasks: Vec<Task>) -> Self {
        if condition {
            self.append(name, tasks)
        } else {
            self
        }
    }

    pub fn extend(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.phases.extend(phases);
        self
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn into_vec(self) -> Vec<Phase> {
        self.phases
    }
}

/// Serializable snapshot of a planned phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub name: String,
    pub tasks: Vec<TaskSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub name: String,
    pub mode: TaskMode,
}

pub fn summarize(phases: &[Phase]) -> Vec<PhaseSummary> {
    phases.iter().map(Phase::summary).collect()
}
