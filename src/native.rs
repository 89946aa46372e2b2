//! A reference [`Transport`] backed by `tokio-tungstenite`.
//!
//! Reconnect, backoff, auth, and resubscription all live in
//! [`crate::reconnect`] — this type's only job is to open one socket,
//! forward its frames into the core as [`TransportEvent`]s, and forward
//! outgoing sends onto the wire. It is deliberately thin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent};

struct Session {
    outbound: mpsc::UnboundedSender<Message>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

/// Connects to `url` on every [`Transport::connect`] call; each call
/// replaces whatever socket and background tasks the previous one had.
pub struct NativeTransport {
    url: String,
    open: AtomicBool,
    reconnecting: AtomicBool,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    session: Mutex<Option<Session>>,
}

impl NativeTransport {
    /// Build a transport for `url`. Returns the transport and the
    /// receiving half of its event channel — hand the latter to
    /// [`crate::connection::Connection::open`].
    pub fn new(url: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = Self {
            url: url.into(),
            open: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            event_tx,
            session: Mutex::new(None),
        };
        (transport, event_rx)
    }
}

#[async_trait]
impl Transport for NativeTransport {
    async fn connect(&self) -> bool {
        let (stream, _response) = match tokio_tungstenite::connect_async(&self.url).await {
            Ok(pair) => pair,
            Err(e) => {
                let err = TransportError::OpenFailed(e.to_string());
                tracing::warn!(url = %self.url, error = %err, "websocket connect failed");
                return false;
            }
        };

        let (mut sink, mut stream) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let write_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let read_event_tx = self.event_tx.clone();
        let read_task = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let _ = read_event_tx.send(TransportEvent::Message(text.to_string()));
                    }
                    Ok(Message::Binary(bytes)) => {
                        let _ = read_event_tx.send(TransportEvent::Message(
                            String::from_utf8_lossy(&bytes).into_owned(),
                        ));
                    }
                    Ok(Message::Close(_)) => {
                        let _ = read_event_tx.send(TransportEvent::Close);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = read_event_tx.send(TransportEvent::Error(e.to_string()));
                    }
                }
            }
            let _ = read_event_tx.send(TransportEvent::Close);
        });

        *self.session.lock().unwrap() = Some(Session {
            outbound: outbound_tx,
            read_task,
            write_task,
        });
        self.open.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(TransportEvent::Open);
        true
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            if let Some(session) = self.session.lock().unwrap().take() {
                session.read_task.abort();
                session.write_task.abort();
            }
            let _ = self.event_tx.send(TransportEvent::Close);
        }
    }

    fn reset(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(session) = self.session.lock().unwrap().take() {
            session.read_task.abort();
            session.write_task.abort();
        }
    }

    fn send(&self, data: &str) {
        let Some(session) = self.session.lock().unwrap().as_ref().map(|s| s.outbound.clone()) else {
            tracing::warn!(url = %self.url, "send with no open session");
            return;
        };
        if session.send(Message::Text(data.to_string().into())).is_err() {
            let err = TransportError::SendFailed("write task gone".to_string());
            tracing::warn!(url = %self.url, error = %err, "send failed");
        }
    }

    fn dispose(&self) {
        if let Some(session) = self.session.lock().unwrap().take() {
            session.read_task.abort();
            session.write_task.abort();
        }
    }

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
