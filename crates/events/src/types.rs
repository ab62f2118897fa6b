//! Event types emitted by the lifecycle engine

use chrono::{DateTime, Utc};
use machined_core::Sequence;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Position of the event in the emitter's stream (0 when published directly)
    #[serde(default)]
    pub ordinal: u64,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            ordinal: 0,
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn with_ordinal(mut self, ordinal: u64) -> Self {
        self.ordinal = ordinal;
        self
    }
}

/// Observations published by the sequencer.
///
/// Events are fire-and-forget; nothing waits for them to be consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A sequence began executing its phases.
    #[serde(rename = "sequence.start")]
    SequenceStart { sequence: Sequence },

    /// A sequence terminated because of an unrecoverable failure.
    #[serde(rename = "sequence.fatal_error")]
    FatalSequencerError { sequence: Sequence, error: String },
}

impl Event {
    /// The sequence this event belongs to.
    pub fn sequence(&self) -> Sequence {
        match self {
            Event::SequenceStart { sequence } => *sequence,
            Event::FatalSequencerError { sequence, .. } => *sequence,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::FatalSequencerError { .. })
    }
}
