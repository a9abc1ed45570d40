//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. It is the exposed
//! ServiceEvent stream: the detector publishes every status transition here, the
//! runtime publishes shutdown progress, and subscriber workers publish their own
//! overflow/panic reports.
//!
//! ## Architecture
//! ```text
//! Publishers:                         Receivers:
//!   Detector   ──┐
//!   Runtime    ──┼──────► Bus ──┬───► subscriber listener ──► SubscriberSet
//!   Sub workers──┘ (broadcast)  └───► external consumers (UI, notifiers)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_publish_reaches_each_receiver() {
        let bus = Bus::new(0);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(Event::new(EventKind::ShutdownRequested));
        assert_eq!(a.recv().await.unwrap().kind, EventKind::ShutdownRequested);
        assert_eq!(b.recv().await.unwrap().kind, EventKind::ShutdownRequested);
    }
}
