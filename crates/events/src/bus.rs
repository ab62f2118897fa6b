//! Broadcast fan-out for lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::EventEnvelope;

/// Envelopes buffered per receiver before it starts lagging.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Append-only event stream shared by the engine and its observers.
///
/// Publishing never waits on a receiver. A receiver that falls more than the
/// channel capacity behind gets `RecvError::Lagged` and resumes at the oldest
/// envelope still buffered.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    published: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A zero capacity is bumped to one; tokio rejects empty channels.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hand `envelope` to every live receiver, returning how many got it.
    ///
    /// With nobody listening the envelope is counted and dropped.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.tx.send(envelope).unwrap_or_default()
    }

    /// Receivers only see envelopes published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn receivers(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Envelopes published over the bus lifetime, heard or not.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.receivers())
            .field("published", &self.published())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use broadcast::error::{RecvError, TryRecvError};
    use machined_core::Sequence;

    fn started(sequence: Sequence) -> EventEnvelope {
        EventEnvelope::new(Event::SequenceStart { sequence })
    }

    #[tokio::test]
    async fn test_every_observer_sees_the_fatal_error() {
        let bus = EventBus::new();
        let mut api = bus.subscribe();
        let mut console = bus.subscribe();

        let fatal = EventEnvelope::new(Event::FatalSequencerError {
            sequence: Sequence::Upgrade,
            error: "disk not found".to_string(),
        });
        assert_eq!(bus.publish(fatal.clone()), 2);

        for rx in [&mut api, &mut console] {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.id, fatal.id);
            assert!(got.event.is_fatal());
            assert_eq!(got.event.sequence(), Sequence::Upgrade);
        }
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(started(Sequence::Boot));

        let mut rx = bus.subscribe();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        assert_eq!(bus.publish(started(Sequence::Noop)), 1);
        assert_eq!(bus.published(), 2);
    }

    #[test]
    fn test_unheard_events_still_counted() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(started(Sequence::Noop)), 0);
        assert_eq!(bus.published(), 1);
    }

    #[tokio::test]
    async fn test_slow_observer_lags_instead_of_blocking() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for _ in 0..5 {
            bus.publish(started(Sequence::Reboot));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_zero_capacity_is_usable() {
        let bus = EventBus::with_capacity(0);
        let mut rx = bus.subscribe();

        bus.publish(started(Sequence::Shutdown));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_clones_share_one_stream() {
        let bus = EventBus::new();
        let observer = bus.clone();

        let rx = observer.subscribe();
        assert_eq!(bus.receivers(), 1);

        drop(rx);
        assert_eq!(bus.receivers(), 0);

        bus.publish(started(Sequence::Shutdown));
        assert_eq!(observer.published(), 1);
    }
}
