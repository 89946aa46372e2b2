//! The reconnect / resubscribe state machine.
//!
//! One task per [`Connection`] owns the transport's event channel for the
//! connection's entire lifetime. It drives the initial connect, any
//! number of reconnects, and ordinary message dispatch while connected —
//! all from the same loop, so there is never more than one reconnect
//! attempt in flight for a given connection.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::dispatch::dispatch_frame;
use crate::events::ConnectionEvent;
use crate::transport::{Transport, TransportEvent};

/// Outcome of handling a transport close.
enum CloseOutcome {
    /// Auto-reconnect applies; re-enter the connect loop.
    Retry,
    /// A reconnect loop is already in flight; this task should stand down.
    AlreadyReconnecting,
    /// No further reconnect; the connection is done.
    Terminal,
}

/// Drive `transport` for the lifetime of `conn`: connect (retrying per
/// `conn.options`), authenticate and resubscribe, dispatch inbound
/// frames, and transition back into reconnecting on every close — until
/// a terminal outcome ends the task.
pub(crate) async fn run(conn: Arc<Connection>, transport: Arc<dyn Transport>, mut event_rx: mpsc::UnboundedReceiver<TransportEvent>) {
    loop {
        if !try_connect_with_backoff(&conn, &transport).await {
            return;
        }

        on_open(&conn);
        let disconnect_time = conn.take_disconnect_time();

        if process_reconnect(&conn, &transport).await {
            finish_reconnect_success(&conn, &transport, disconnect_time);
        } else {
            conn.restore_disconnect_time(disconnect_time);
            conn.connected.store(false, Ordering::SeqCst);
            if !bump_resubscribe_try_and_check_cap(&conn, &transport).await {
                return;
            }
            transport.close().await;
            drain_stale_events(&mut event_rx);
            conn.pending.fail_all();
            // `transport.reconnecting()` is already `true` from the outage
            // that led to this reconnect attempt, so routing this through
            // `handle_close`'s guard would always read `AlreadyReconnecting`
            // and drop the retry. Decide directly instead.
            if conn.options.auto_reconnect && conn.should_reconnect.load(Ordering::SeqCst) {
                continue;
            }
            terminal_close(&conn, &transport).await;
            return;
        }

        match drive_connected_phase(&conn, &transport, &mut event_rx).await {
            CloseOutcome::Retry => continue,
            CloseOutcome::AlreadyReconnecting | CloseOutcome::Terminal => return,
        }
    }
}

/// Drain any events left queued from a close this task forced itself
/// (e.g. after a failed resubscribe pass), so a stale `Close` doesn't get
/// misread as an immediate failure of the *next* session.
fn drain_stale_events(event_rx: &mut mpsc::UnboundedReceiver<TransportEvent>) {
    while event_rx.try_recv().is_ok() {}
}

/// Establish a session, retrying failures per `auto_reconnect` and
/// `max_reconnect_tries`. Returns `false` once it has given up
/// terminally (already emitted the relevant events).
async fn try_connect_with_backoff(conn: &Connection, transport: &Arc<dyn Transport>) -> bool {
    loop {
        if conn.reconnect_try.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(conn.options.reconnect_interval).await;
            if !conn.should_reconnect.load(Ordering::SeqCst) {
                transport.set_reconnecting(false);
                return false;
            }
        }

        transport.reset();
        if transport.connect().await {
            return true;
        }

        tracing::warn!(connection_id = %conn.id, "transport failed to open");
        let tries = conn.reconnect_try.fetch_add(1, Ordering::SeqCst) + 1;
        conn.resubscribe_try.store(0, Ordering::SeqCst);

        let within_cap = conn
            .options
            .max_reconnect_tries
            .map_or(true, |max| tries < max);
        if !conn.options.auto_reconnect || !within_cap {
            give_up_terminal(conn, transport).await;
            return false;
        }
    }
}

/// Run auth (if required) and resubscribe every request-bound
/// subscription, in batches of `max_concurrent_resubscriptions`.
async fn process_reconnect(conn: &Connection, transport: &Arc<dyn Transport>) -> bool {
    if conn.authenticated.load(Ordering::SeqCst) {
        if !transport.is_open() {
            return false;
        }
        if !conn.parent.authenticate(conn).await {
            return false;
        }
    }

    let to_resubscribe: Vec<_> = conn
        .subs
        .snapshot()
        .into_iter()
        .filter(|s| s.request.is_some())
        .collect();

    for batch in to_resubscribe.chunks(conn.options.max_concurrent_resubscriptions.max(1)) {
        let attempts = batch.iter().map(|sub| {
            let sub = Arc::clone(sub);
            async move {
                let ok = conn.parent.subscribe_and_wait(conn, &sub).await;
                if ok {
                    sub.set_confirmed(true);
                }
                ok
            }
        });
        let results = join_all(attempts).await;
        if results.into_iter().any(|ok| !ok) || !transport.is_open() {
            return false;
        }
    }

    true
}

fn on_open(conn: &Connection) {
    conn.connected.store(true, Ordering::SeqCst);
    conn.reconnect_try.store(0, Ordering::SeqCst);
    conn.set_paused_activity(false);
}

fn finish_reconnect_success(conn: &Connection, transport: &Arc<dyn Transport>, disconnect_time: Option<chrono::DateTime<Utc>>) {
    conn.resubscribe_try.store(0, Ordering::SeqCst);
    if conn.lost_triggered.swap(false, Ordering::SeqCst) {
        let outage = disconnect_time
            .map(|t| (Utc::now() - t).to_std().unwrap_or_default())
            .unwrap_or_default();
        conn.events.emit(ConnectionEvent::ConnectionRestored(outage));
    }
    transport.set_reconnecting(false);
}

/// Increment the resubscribe-retry counter; give up terminally if the
/// cap is hit. Returns `true` when the caller should retry.
async fn bump_resubscribe_try_and_check_cap(conn: &Connection, transport: &Arc<dyn Transport>) -> bool {
    let tries = conn.resubscribe_try.fetch_add(1, Ordering::SeqCst) + 1;
    let within_cap = conn
        .options
        .max_resubscribe_tries
        .map_or(true, |max| tries < max);
    if !within_cap {
        give_up_terminal(conn, transport).await;
        return false;
    }
    true
}

/// Exhausted the retry budget: stop reconnecting for good.
async fn give_up_terminal(conn: &Connection, transport: &Arc<dyn Transport>) {
    conn.should_reconnect.store(false, Ordering::SeqCst);
    conn.parent.remove_connection(&conn.id);
    conn.events.emit(ConnectionEvent::Closed);
    conn.events.emit(ConnectionEvent::ConnectionClosed);
    transport.set_reconnecting(false);
    transport.dispose();
    tracing::error!(connection_id = %conn.id, "giving up reconnecting");
}

/// Process inbound events while connected, until the transport closes.
async fn drive_connected_phase(conn: &Arc<Connection>, transport: &Arc<dyn Transport>, event_rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> CloseOutcome {
    while let Some(event) = event_rx.recv().await {
        match event {
            TransportEvent::Open => on_open(conn),
            TransportEvent::Message(raw) => dispatch_frame(
                &raw,
                &conn.id,
                conn.codec.as_ref(),
                &conn.pending,
                &conn.subs,
                conn.parent.as_ref(),
                &conn.options,
                &conn.events,
            ),
            TransportEvent::Error(msg) => tracing::warn!(connection_id = %conn.id, error = %msg, "transport error"),
            TransportEvent::Close => return handle_close(conn, transport).await,
        }
    }
    // The channel closed without an explicit Close event (transport dropped).
    handle_close(conn, transport).await
}

/// The on-close transition: fail every pending request, then branch on
/// whether a reconnect should follow.
async fn handle_close(conn: &Connection, transport: &Arc<dyn Transport>) -> CloseOutcome {
    conn.connected.store(false, Ordering::SeqCst);
    conn.pending.fail_all();

    if conn.options.auto_reconnect && conn.should_reconnect.load(Ordering::SeqCst) {
        if transport.reconnecting() {
            return CloseOutcome::AlreadyReconnecting;
        }
        transport.set_reconnecting(true);
        conn.set_disconnect_time_now();
        if !conn.lost_triggered.swap(true, Ordering::SeqCst) {
            conn.events.emit(ConnectionEvent::ConnectionLost);
        }
        CloseOutcome::Retry
    } else {
        terminal_close(conn, transport).await;
        CloseOutcome::Terminal
    }
}

/// Tear down for good: stop reconnecting, drop from the parent's
/// registry, and emit the closing events — unless `conn.close()` already
/// emitted them directly (a user-initiated close forces this same
/// transition via its own `transport.close()` call).
async fn terminal_close(conn: &Connection, transport: &Arc<dyn Transport>) {
    let was_should_reconnect = conn.should_reconnect.swap(false, Ordering::SeqCst);
    conn.parent.remove_connection(&conn.id);
    if !conn.user_closed() {
        if was_should_reconnect {
            conn.events.emit(ConnectionEvent::ConnectionClosed);
        }
        conn.events.emit(ConnectionEvent::Closed);
    }
    transport.set_reconnecting(false);
    transport.dispose();
}
