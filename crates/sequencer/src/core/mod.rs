//! Core abstractions for the sequence execution model.
//!
//! - [`Phase`] / [`Task`] - What a sequence expands into
//! - [`TaskMode`] - Per-task concurrency classification
//! - [`PhaseList`] - Builder used by planners
//! - [`Executor`] - Runs a phase list against the runtime
//! - [`OrderedEventEmitter`] - Event emitter with sequence guarantees

mod events;
mod execution;
mod phase;

pub use events::OrderedEventEmitter;
pub use execution::Executor;
pub use phase::{
    summarize, Phase, PhaseList, PhaseSummary, Task, TaskContext, TaskFn, TaskMode, TaskSummary,
};
