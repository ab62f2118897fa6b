//! Machine lifecycle sequencer.
//!
//! A lifecycle trigger ([`machined_core::Sequence`]) is planned by a
//! [`Sequencer`] into ordered [`Phase`]s of [`Task`]s, which the [`Executor`]
//! runs against the process-wide [`Runtime`], reporting progress on the
//! runtime's event bus.

pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod platform;
pub mod resources;
pub mod runtime;
pub mod sequencer;
pub mod services;
pub mod tasks;

pub use config::{RetrySettings, SequencerConfig};
pub use controller::Controller;
pub use crate::core::{
    Executor, OrderedEventEmitter, Phase, PhaseList, PhaseSummary, Task, TaskContext, TaskMode,
    TaskSummary,
};
pub use error::{Result, SequencerError, TaskError, TaskResult};
pub use platform::{DryRunPlatform, Platform, PlatformError, PlatformResult};
pub use resources::SequenceGuard;
pub use runtime::{MachineState, Runtime, SequenceProgress};
pub use sequencer::{MachineSequencer, Sequencer};
