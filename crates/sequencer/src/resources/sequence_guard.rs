//! RAII guard for the single in-flight sequence of a runtime.
//!
//! Holding a [`SequenceGuard`] is what "a sequence is running" means. Dropping
//! it returns the runtime to idle; dropping it before the run was settled
//! (the executor future was dropped or panicked) reports the run as fatal.

use chrono::Utc;
use machined_core::Sequence;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::core::OrderedEventEmitter;
use crate::error::{Result, SequencerError};
use crate::runtime::SequenceProgress;

pub(crate) type ActiveSlot = Arc<Mutex<Option<SequenceProgress>>>;

pub struct SequenceGuard {
    sequence: Sequence,
    slot: ActiveSlot,
    events: OrderedEventEmitter,
    settled: bool,
    released: bool,
}

impl SequenceGuard {
    /// Claim the runtime's active slot for `sequence`.
    pub(crate) fn acquire(
        slot: ActiveSlot,
        events: OrderedEventEmitter,
        sequence: Sequence,
    ) -> Result<Self> {
        {
            let mut active = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = active.as_ref() {
                return Err(SequencerError::SequenceInProgress {
                    active: current.sequence,
                    requested: sequence,
                });
            }
            *active = Some(SequenceProgress {
                sequence,
                phase_index: None,
                phase: None,
                started_at: Utc::now(),
            });
        }

        debug!(sequence = %sequence, "Sequence guard acquired");

        Ok(Self {
            sequence,
            slot,
            events,
            settled: false,
            released: false,
        })
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Record that execution moved on to phase `index`.
    pub fn advance(&self, index: usize, phase: &str) {
        let mut active = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(progress) = active.as_mut() {
            progress.phase_index = Some(index);
            progress.phase = Some(phase.to_string());
        }
    }

    /// Mark the sequence as completed successfully.
    pub fn mark_completed(&mut self) {
        debug!(sequence = %self.sequence, "Sequence marked as completed");
        self.settled = true;
    }

    /// Settle the sequence as failed.
    ///
    /// The runtime is idle again before the fatal error is published, so an
    /// observer reacting to the event can start the next sequence.
    pub fn mark_failed(mut self, error: &SequencerError) {
        self.settled = true;
        self.release();
        self.events.fatal_error(self.sequence, error);
    }

    /// Give the slot back for a sequence that never started. Nothing is
    /// published.
    pub fn abandon(mut self) {
        debug!(sequence = %self.sequence, "Sequence abandoned before start");
        self.settled = true;
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        let mut active = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *active = None;
        self.released = true;
    }
}

impl Drop for SequenceGuard {
    fn drop(&mut self) {
        self.release();

        if !self.settled {
            warn!(
                sequence = %self.sequence,
                "Sequence guard dropped before completion - emitting fatal error"
            );
            self.events
                .fatal_error(self.sequence, "sequence terminated unexpectedly");
        }
    }
}
