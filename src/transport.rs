//! The transport adapter contract consumed by the core.
//!
//! The core programs against this trait only; it never depends on a
//! concrete websocket library. A reference implementation backed by
//! `tokio-tungstenite` ships behind the `native-transport` feature (see
//! [`crate::native`]).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Events a transport implementation pushes into the core. This is the
/// Rust expression of the four callbacks in the design spec
/// (`on_open`/`on_message`/`on_close`/`on_error`): rather than the core
/// registering closures on the transport, the transport is handed the
/// sending half of this channel at construction and pushes events into
/// it as they occur.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close,
    Error(String),
}

/// The abstract duplex channel the core drives.
///
/// Implementations are expected to be cheaply cloneable handles (e.g. an
/// `Arc`-wrapped inner state) since the core holds one for the lifetime
/// of a `Connection` and calls its methods from multiple tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a session. Returns whether it succeeded; a `false`
    /// return (or an error the implementation swallows into `false`) is
    /// counted by the reconnect state machine toward `reconnect_try`.
    async fn connect(&self) -> bool;

    /// Close the transport. Idempotent.
    async fn close(&self);

    /// Discard internal state so `connect` may be retried from scratch.
    fn reset(&self);

    /// Best-effort, non-blocking send.
    fn send(&self, data: &str);

    /// Release all resources. Called once, on terminal connection close.
    fn dispose(&self);

    /// Whether the transport believes it currently holds an open session.
    fn is_open(&self) -> bool;

    /// Guards against more than one reconnect loop running at a time.
    fn reconnecting(&self) -> bool;

    fn set_reconnecting(&self, value: bool);
}

/// A minimal in-memory [`Transport`] used by tests and as a template for
/// real implementations: `send` and lifecycle calls are observable via
/// the paired [`MockTransportHandle`], and inbound frames are injected
/// with [`MockTransportHandle::push_message`].
pub struct MockTransport {
    open: AtomicBool,
    reconnecting: AtomicBool,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    sent_tx: mpsc::UnboundedSender<String>,
    connect_results: std::sync::Mutex<Vec<bool>>,
}

/// Caller-side handle paired with a [`MockTransport`], used to drive it
/// from test code (inject frames, observe sends, force a close).
pub struct MockTransportHandle {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub sent: mpsc::UnboundedReceiver<String>,
}

impl MockTransport {
    /// Build a mock whose `connect()` calls succeed or fail in the order
    /// given by `connect_results` (repeating the last entry once
    /// exhausted, or succeeding if the list is empty).
    pub fn new(connect_results: Vec<bool>) -> (Self, MockTransportHandle) {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let transport = Self {
            open: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            event_tx,
            sent_tx,
            connect_results: std::sync::Mutex::new(connect_results),
        };
        (transport, MockTransportHandle { events, sent })
    }

    /// Push an inbound frame as though the remote had sent it.
    pub fn push_message(&self, raw: impl Into<String>) {
        let _ = self.event_tx.send(TransportEvent::Message(raw.into()));
    }

    /// Simulate the remote closing the connection.
    pub fn simulate_close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.event_tx.send(TransportEvent::Close);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> bool {
        let next = {
            let mut results = self.connect_results.lock().unwrap();
            if results.is_empty() {
                true
            } else if results.len() == 1 {
                results[0]
            } else {
                results.remove(0)
            }
        };
        if next {
            self.open.store(true, Ordering::SeqCst);
            let _ = self.event_tx.send(TransportEvent::Open);
        }
        next
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.event_tx.send(TransportEvent::Close);
        }
    }

    fn reset(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn send(&self, data: &str) {
        let _ = self.sent_tx.send(data.to_string());
    }

    fn dispose(&self) {}

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    fn set_reconnecting(&self, value: bool) {
        self.reconnecting.store(value, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_emits_open_and_tracks_state() {
        let (transport, mut handle) = MockTransport::new(vec![true]);
        assert!(transport.connect().await);
        assert!(transport.is_open());
        assert!(matches!(handle.events.recv().await, Some(TransportEvent::Open)));
    }

    #[tokio::test]
    async fn failing_connect_emits_nothing() {
        let (transport, mut handle) = MockTransport::new(vec![false, true]);
        assert!(!transport.connect().await);
        assert!(!transport.is_open());
        assert!(transport.connect().await);
        assert!(matches!(handle.events.recv().await, Some(TransportEvent::Open)));
    }

    #[tokio::test]
    async fn send_is_observable() {
        let (transport, mut handle) = MockTransport::new(vec![]);
        transport.send("hello");
        assert_eq!(handle.sent.recv().await, Some("hello".to_string()));
    }
}
