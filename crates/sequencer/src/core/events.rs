//! Ordered event emitter with sequence guarantees.
//!
//! Every envelope leaving the emitter carries a monotonically increasing
//! ordinal so observers can order events even across lagging receivers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, EventEnvelope};
use machined_core::Sequence;
use tracing::debug;

/// Event emitter with ordinal guarantees.
///
/// Wraps an EventBus and stamps each envelope with the next ordinal.
#[derive(Clone)]
pub struct OrderedEventEmitter {
    bus: EventBus,
    ordinal: Arc<AtomicU64>,
}

impl OrderedEventEmitter {
    /// Create a new ordered event emitter wrapping the given bus.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            ordinal: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event with the next ordinal.
    pub fn emit(&self, event: Event) -> u64 {
        let ordinal = self.ordinal.fetch_add(1, Ordering::SeqCst) + 1;
        let receivers = self.bus.publish(EventEnvelope::new(event).with_ordinal(ordinal));
        debug!(ordinal, receivers, "Event emitted");
        ordinal
    }

    pub fn sequence_start(&self, sequence: Sequence) -> u64 {
        self.emit(Event::SequenceStart { sequence })
    }

    pub fn fatal_error(&self, sequence: Sequence, error: impl ToString) -> u64 {
        self.emit(Event::FatalSequencerError {
            sequence,
            error: error.to_string(),
        })
    }

    /// Ordinal of the most recently emitted event (0 before the first).
    pub fn current_ordinal(&self) -> u64 {
        self.ordinal.load(Ordering::SeqCst)
    }

    /// Get a reference to the underlying event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl std::fmt::Debug for OrderedEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedEventEmitter")
            .field("bus", &self.bus)
            .field("ordinal", &self.current_ordinal())
            .finish()
    }
}
