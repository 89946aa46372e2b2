//! Per-frame dispatch pipeline: parse → pending-correlation → subscription
//! fan-out → unhandled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::collaborator::ParentClient;
use crate::events::{ConnectionEvent, EventBus};
use crate::frame::{parse_with_retry, Codec, ParsedFrame, SubscriptionKey};
use crate::options::ConnectionOptions;
use crate::pending::PendingRegistry;
use crate::subscription::SubscriptionRegistry;

/// Frames whose handler sequence takes longer than this draw a "processing
/// slow" warning (spec §4.4 step 6).
const SLOW_DISPATCH_THRESHOLD: Duration = Duration::from_millis(500);

/// Run the full dispatch pipeline for one raw inbound frame.
#[allow(clippy::too_many_arguments)]
pub(crate) fn dispatch_frame(
    raw: &str,
    connection_id: &Arc<str>,
    codec: &dyn Codec,
    pending: &PendingRegistry,
    subs: &SubscriptionRegistry,
    parent: &dyn ParentClient,
    options: &ConnectionOptions,
    events: &EventBus,
) {
    if raw.is_empty() {
        return;
    }

    let received_at = Utc::now();
    let value = match parse_with_retry(codec, raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "dropping unparseable frame");
            return;
        }
    };

    let frame = ParsedFrame {
        value,
        raw: options.output_original_data.then(|| raw.to_string()),
        received_at,
        connection_id: Arc::clone(connection_id),
    };

    let pending_handled = pending.check_and_sweep(&frame);
    if pending_handled && !options.continue_on_query_response {
        return;
    }

    let snapshot = subs.snapshot();
    let start = Instant::now();
    let mut any_subscription_handled = false;

    for sub in &snapshot {
        // Request-bound subscriptions take priority: a subscription carrying
        // both a request and an identifier is matched (and transformed) as
        // request-bound.
        let matched = match (&sub.request, &sub.identifier) {
            (Some(req), _) => parent.matches(&frame, SubscriptionKey::Request(req)),
            (None, Some(id)) => parent.matches(&frame, SubscriptionKey::Identifier(id)),
            (None, None) => false,
        };
        if !matched {
            continue;
        }
        any_subscription_handled = true;

        if sub.request.is_some() {
            let transformed = parent.transform(frame.clone());
            sub.dispatch(&transformed);
        } else {
            sub.dispatch(&frame);
        }
    }

    let elapsed = start.elapsed();
    if elapsed > SLOW_DISPATCH_THRESHOLD {
        tracing::warn!(?elapsed, "message processing slow");
    }

    if !pending_handled && !any_subscription_handled {
        if !options.unhandled_message_expected {
            tracing::warn!(connection_id = %connection_id, "unhandled message");
        }
        events.emit(ConnectionEvent::UnhandledMessage(frame));
    }
}
