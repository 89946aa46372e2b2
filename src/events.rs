//! Lifecycle events emitted by a [`crate::connection::Connection`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::frame::ParsedFrame;

/// Fire-and-forget lifecycle events. A listener's failure (panic) never
/// crashes the dispatcher — each is wrapped individually.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The transport closed and a reconnect attempt has begun.
    ConnectionLost,
    /// Reconnect + resubscribe succeeded after an outage of this duration.
    ConnectionRestored(Duration),
    /// Auto-reconnect gave up after exhausting its retry budget.
    ConnectionClosed,
    /// The connection is fully, terminally closed (user-initiated or not).
    Closed,
    /// The remote declared data flow suspended while the socket stayed open.
    ActivityPaused,
    ActivityUnpaused,
    /// A frame matched neither a pending request nor any subscription.
    UnhandledMessage(ParsedFrame),
}

type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// A small multicast list of event listeners.
#[derive(Default, Clone)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&ConnectionEvent) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Arc::new(listener));
    }

    /// Invoke every listener with `event`. Listeners run outside any
    /// internal lock; a panicking listener is caught so it cannot poison
    /// the connection's background tasks.
    pub fn emit(&self, event: ConnectionEvent) {
        let snapshot: Vec<Listener> = self.listeners.lock().unwrap().clone();
        for listener in snapshot {
            let event_ref = &event;
            if catch_unwind(AssertUnwindSafe(|| listener(event_ref))).is_err() {
                tracing::warn!("event listener panicked; ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn every_listener_receives_the_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(ConnectionEvent::Closed);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn a_panicking_listener_does_not_stop_the_rest() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicU32::new(0));

        bus.subscribe(|_| panic!("boom"));
        let ran_clone = Arc::clone(&ran);
        bus.subscribe(move |_| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(ConnectionEvent::Closed);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
