use machined_core::{CoreError, Sequence};
use thiserror::Error;

use crate::platform::PlatformError;
use crate::services::retry::RetryError;

/// Failure reported by a single task body.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("{operation} gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: PlatformError,
    },

    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Convert the outcome of a retried platform operation.
    pub fn from_retry(operation: impl Into<String>, error: RetryError<PlatformError>) -> Self {
        match error {
            RetryError::Cancelled => Self::Cancelled,
            RetryError::Unexpected(e) => Self::Platform(e),
            RetryError::Timeout { attempts, last } => Self::RetriesExhausted {
                operation: operation.into(),
                attempts,
                last,
            },
        }
    }
}

pub type TaskResult = std::result::Result<(), TaskError>;

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("cannot start sequence {requested}: sequence {active} is already running")]
    SequenceInProgress {
        active: Sequence,
        requested: Sequence,
    },

    #[error("sequence {sequence} cannot be planned from a {received} request")]
    RequestMismatch {
        sequence: Sequence,
        received: &'static str,
    },

    #[error("task {task} in phase {phase} failed: {source}")]
    TaskFailed {
        phase: String,
        task: String,
        #[source]
        source: TaskError,
    },

    #[error("task {task} in phase {phase} panicked: {message}")]
    TaskPanicked {
        phase: String,
        task: String,
        message: String,
    },

    #[error("sequence cancelled in phase {phase}")]
    Cancelled { phase: String, task: Option<String> },
}

impl SequencerError {
    /// Whether the run stopped because cancellation was requested rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether the sequence was rejected before any task ran.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            Self::Core(_) | Self::SequenceInProgress { .. } | Self::RequestMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SequencerError>;
