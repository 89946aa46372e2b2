//! The parent client collaborator contract (§6 "Parent client").
//!
//! Everything API-specific — how to build an auth frame, how to build a
//! subscribe request, how a parsed frame maps onto a subscription's
//! `identifier` or `request` — lives with the caller. The core only
//! needs this narrow surface.

use async_trait::async_trait;
use serde_json::Value;

use crate::connection::Connection;
use crate::frame::{ParsedFrame, SubscriptionKey};
use crate::subscription::Subscription;

#[async_trait]
pub trait ParentClient: Send + Sync {
    /// Run the authentication handshake for a (re)connected transport.
    /// Only called when the connection was previously marked
    /// authenticated (see `Connection::mark_authenticated`).
    async fn authenticate(&self, connection: &Connection) -> bool;

    /// Send `subscription`'s subscribe request and wait for server
    /// confirmation. Used only for request-bound subscriptions during
    /// resubscription after reconnect.
    async fn subscribe_and_wait(&self, connection: &Connection, subscription: &Subscription) -> bool;

    /// Send an unsubscribe request for a confirmed subscription.
    async fn unsubscribe(&self, connection: &Connection, subscription: &Subscription);

    /// Whether `frame` belongs to the stream identified by `key`.
    fn matches(&self, frame: &ParsedFrame, key: SubscriptionKey<'_>) -> bool;

    /// Optional post-processing applied to a frame matched by a
    /// request-bound subscription, before the handler runs.
    fn transform(&self, frame: ParsedFrame) -> ParsedFrame {
        frame
    }

    /// Called once, on terminal connection close, so the parent can drop
    /// its weak reference. `transport_id` is the connection's id.
    fn remove_connection(&self, transport_id: &str);
}

/// Convenience matcher for the common case where `request` is itself the
/// exact JSON value to compare against, and `identifier` is an exact
/// string compare against a `"channel"` field. Callers with richer
/// matching semantics implement [`ParentClient`] directly instead.
pub fn default_matches(frame: &ParsedFrame, key: SubscriptionKey<'_>) -> bool {
    match key {
        SubscriptionKey::Identifier(id) => frame.value.get("channel").and_then(Value::as_str) == Some(id),
        SubscriptionKey::Request(req) => &frame.value == req,
    }
}
