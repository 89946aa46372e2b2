//! The connection facade: the public surface consumers program against.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::collaborator::ParentClient;
use crate::error::{ConnError, PendingError};
use crate::events::{ConnectionEvent, EventBus};
use crate::frame::{Codec, ParsedFrame};
use crate::options::ConnectionOptions;
use crate::pending::PendingRegistry;
use crate::reconnect;
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::transport::{Transport, TransportEvent};

/// A single logical duplex connection to a remote endpoint.
///
/// Owns its transport instance, its subscription list, and its pending
/// request list. Survives many transport instances across reconnects —
/// only [`Connection::close`] ends its lifetime.
pub struct Connection {
    pub(crate) id: Arc<str>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) subs: SubscriptionRegistry,
    pub(crate) pending: PendingRegistry,
    pub(crate) options: ConnectionOptions,
    pub(crate) events: EventBus,
    pub(crate) parent: Arc<dyn ParentClient>,
    pub(crate) codec: Arc<dyn Codec>,

    pub(crate) connected: AtomicBool,
    pub(crate) authenticated: AtomicBool,
    pub(crate) should_reconnect: AtomicBool,
    pub(crate) paused_activity: AtomicBool,
    pub(crate) reconnect_try: AtomicU32,
    pub(crate) resubscribe_try: AtomicU32,
    pub(crate) disconnect_time: Mutex<Option<DateTime<Utc>>>,
    pub(crate) lost_triggered: AtomicBool,
    closed: AtomicBool,

    /// Free-form label for logging; not interpreted by the core.
    pub tag: Option<String>,
}

impl Connection {
    /// Open a connection: wires up the background reconnect/dispatch task
    /// and returns immediately. The task drives `transport` through its
    /// full lifecycle — initial connect (with the same retry policy as
    /// any later reconnect), auth, resubscribe, and ongoing dispatch —
    /// until a terminal close.
    pub fn open(
        id: impl Into<Arc<str>>,
        transport: Arc<dyn Transport>,
        event_rx: mpsc::UnboundedReceiver<TransportEvent>,
        parent: Arc<dyn ParentClient>,
        codec: Arc<dyn Codec>,
        options: ConnectionOptions,
        tag: Option<String>,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection {
            id: id.into(),
            transport: Arc::clone(&transport),
            subs: SubscriptionRegistry::new(),
            pending: PendingRegistry::new(),
            options,
            events: EventBus::new(),
            parent,
            codec,
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            should_reconnect: AtomicBool::new(true),
            paused_activity: AtomicBool::new(false),
            reconnect_try: AtomicU32::new(0),
            resubscribe_try: AtomicU32::new(0),
            disconnect_time: Mutex::new(None),
            lost_triggered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tag,
        });

        let task_conn = Arc::clone(&conn);
        tokio::spawn(async move {
            reconnect::run(task_conn, transport, event_rx).await;
        });

        conn
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Mark this connection as requiring authentication on every
    /// (re)connect. The parent client's `authenticate` collaborator is
    /// invoked only when this is set.
    pub fn mark_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }

    /// The remote has declared data flow suspended (or resumed) while the
    /// socket stays open. Idempotent: a repeated call with the same
    /// value does nothing.
    pub fn set_paused_activity(&self, value: bool) {
        let prev = self.paused_activity.swap(value, Ordering::SeqCst);
        if prev != value {
            tracing::debug!(connection_id = %self.id, paused = value, "paused-activity changed");
            self.events.emit(if value {
                ConnectionEvent::ActivityPaused
            } else {
                ConnectionEvent::ActivityUnpaused
            });
        }
    }

    pub fn paused_activity(&self) -> bool {
        self.paused_activity.load(Ordering::SeqCst)
    }

    pub fn on_event(&self, listener: impl Fn(&ConnectionEvent) + Send + Sync + 'static) {
        self.events.subscribe(listener);
    }

    /// Number of *user* subscriptions currently tracked (housekeeping
    /// subscriptions are excluded).
    pub fn subscription_count(&self) -> usize {
        self.subs.count_user()
    }

    pub fn add_subscription(&self, sub: Subscription) -> Arc<Subscription> {
        let sub = Arc::new(sub);
        self.subs.add(Arc::clone(&sub));
        sub
    }

    pub fn get_subscription(&self, id: u64) -> Option<Arc<Subscription>> {
        self.subs.get_by_id(id)
    }

    pub fn get_subscription_by_request(
        &self,
        predicate: impl Fn(&serde_json::Value) -> bool,
    ) -> Option<Arc<Subscription>> {
        self.subs.get_by_request(predicate)
    }

    /// Forward `data` to the transport. Best-effort; does not confirm
    /// delivery.
    pub fn send(&self, data: &str) {
        tracing::debug!(connection_id = %self.id, "send");
        self.transport.send(data);
    }

    /// Send `data` and wait for a frame matching `predicate`, bounded by
    /// `timeout`. Resolves with that frame, a timeout error, or a
    /// closed-before-match error if the connection closes first.
    pub async fn send_and_wait(
        &self,
        data: impl Into<String>,
        timeout: Duration,
        predicate: impl Fn(&ParsedFrame) -> bool + Send + Sync + 'static,
    ) -> Result<ParsedFrame, PendingError> {
        let data = data.into();
        let handle = self.pending.register(predicate, timeout);
        tracing::debug!(connection_id = %self.id, "send_and_wait");
        self.transport.send(&data);
        handle.wait().await
    }

    /// Close a single subscription: unsubscribe on the wire if it was
    /// confirmed, and close the whole connection if that was the last
    /// user subscription.
    pub async fn close_subscription(&self, sub: &Arc<Subscription>) {
        if self.transport.is_open() {
            sub.dispose();
            if sub.confirmed() {
                self.parent.unsubscribe(self, sub).await;
            }
        }

        let remaining_user_subs = self
            .subs
            .snapshot()
            .iter()
            .filter(|s| s.id != sub.id && s.user_subscription)
            .count();
        if sub.user_subscription && remaining_user_subs == 0 {
            self.close().await;
        }

        self.subs.remove(sub.id);
    }

    /// Terminally close the connection. Idempotent — a second call is a
    /// no-op and does not re-emit `closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.connected.store(false, Ordering::SeqCst);
        self.should_reconnect.store(false, Ordering::SeqCst);
        self.parent.remove_connection(&self.id);

        for sub in self.subs.snapshot() {
            sub.dispose();
        }

        self.transport.close().await;
        self.transport.dispose();
        self.events.emit(ConnectionEvent::Closed);
    }

    /// Whether `close` has already run (and therefore already emitted
    /// `Closed` directly). Lets the reconnect task's own close handling
    /// avoid emitting it a second time for the transport close that
    /// `close` triggers.
    pub(crate) fn user_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn take_disconnect_time(&self) -> Option<DateTime<Utc>> {
        self.disconnect_time.lock().unwrap().take()
    }

    pub(crate) fn restore_disconnect_time(&self, value: Option<DateTime<Utc>>) {
        *self.disconnect_time.lock().unwrap() = value;
    }

    pub(crate) fn set_disconnect_time_now(&self) {
        *self.disconnect_time.lock().unwrap() = Some(Utc::now());
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .field("authenticated", &self.is_authenticated())
            .field("subscription_count", &self.subscription_count())
            .field("tag", &self.tag)
            .finish()
    }
}

/// Convenience: map a `send`-only failure onto [`ConnError`] for callers
/// that want a `Result`-returning send.
pub fn send_checked(conn: &Connection, data: &str) -> Result<(), ConnError> {
    if !conn.is_connected() {
        return Err(ConnError::NotConnected);
    }
    conn.send(data);
    Ok(())
}
