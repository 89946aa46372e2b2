//! The subscription registry: an ordered set of live subscriptions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::DispatchError;
use crate::frame::ParsedFrame;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// A handler invoked for each frame matching a subscription. Returning
/// `Err` routes the error to the subscription's exception handler rather
/// than aborting dispatch for other subscriptions.
pub type Handler = Arc<dyn Fn(&ParsedFrame) -> Result<(), DispatchError> + Send + Sync>;

/// Invoked when a handler errors or panics.
pub type ExceptionHandler = Arc<dyn Fn(DispatchError, &ParsedFrame) + Send + Sync>;

/// Released on `close(subscription)` and on full `close()`, before the
/// transport is shut down — e.g. to cancel a timer the caller attached
/// to this subscription.
pub type CancelHook = Box<dyn FnOnce() + Send>;

/// A live interest in a stream of frames, matched either by an opaque
/// identifier or by the original subscribe-request object.
pub struct Subscription {
    pub id: u64,
    pub request: Option<Value>,
    pub identifier: Option<String>,
    pub user_subscription: bool,
    confirmed: AtomicBool,
    handler: Handler,
    exception_handler: Option<ExceptionHandler>,
    cancel_hook: Mutex<Option<CancelHook>>,
}

impl Subscription {
    pub fn builder() -> SubscriptionBuilder {
        SubscriptionBuilder::default()
    }

    pub fn confirmed(&self) -> bool {
        self.confirmed.load(Ordering::SeqCst)
    }

    pub fn set_confirmed(&self, value: bool) {
        self.confirmed.store(value, Ordering::SeqCst);
    }

    /// Take and run the cancellation hook, if one was registered. Safe to
    /// call more than once — only the first call does anything.
    pub fn dispose(&self) {
        if let Some(hook) = self.cancel_hook.lock().unwrap().take() {
            hook();
        }
    }

    /// Invoke the handler, catching both an `Err` return and a panic and
    /// routing either to the exception handler. A faulty handler never
    /// poisons dispatch for other subscriptions.
    pub(crate) fn dispatch(&self, frame: &ParsedFrame) {
        let handler = Arc::clone(&self.handler);
        let result = catch_unwind(AssertUnwindSafe(|| handler(frame)));

        let err = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                DispatchError::Panicked(msg)
            }
        };

        tracing::warn!(subscription_id = self.id, error = %err, "subscription handler failed");
        if let Some(exc) = &self.exception_handler {
            exc(err, frame);
        }
    }
}

#[derive(Default)]
pub struct SubscriptionBuilder {
    request: Option<Value>,
    identifier: Option<String>,
    user_subscription: bool,
    handler: Option<Handler>,
    exception_handler: Option<ExceptionHandler>,
    cancel_hook: Option<CancelHook>,
}

impl SubscriptionBuilder {
    pub fn request(mut self, request: Value) -> Self {
        self.request = Some(request);
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn user_subscription(mut self, value: bool) -> Self {
        self.user_subscription = value;
        self
    }

    pub fn handler(
        mut self,
        handler: impl Fn(&ParsedFrame) -> Result<(), DispatchError> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn exception_handler(
        mut self,
        handler: impl Fn(DispatchError, &ParsedFrame) + Send + Sync + 'static,
    ) -> Self {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    pub fn cancel_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.cancel_hook = Some(Box::new(hook));
        self
    }

    /// Build the subscription. Panics if no handler was set — a
    /// subscription with nothing to do on a matching frame is a caller
    /// bug, not a runtime condition to handle gracefully.
    pub fn build(self) -> Subscription {
        Subscription {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            request: self.request,
            identifier: self.identifier,
            user_subscription: self.user_subscription,
            confirmed: AtomicBool::new(false),
            handler: self.handler.expect("subscription requires a handler"),
            exception_handler: self.exception_handler,
            cancel_hook: Mutex::new(self.cancel_hook),
        }
    }
}

/// Ordered set of live subscriptions for one connection.
///
/// Mutation and iteration happen under a single mutex; the dispatcher
/// always works from a cloned snapshot so handlers never run while the
/// lock is held.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: Mutex<Vec<Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sub: Arc<Subscription>) {
        self.subs.lock().unwrap().push(sub);
    }

    /// Remove a subscription by id. Returns it, if present.
    pub fn remove(&self, id: u64) -> Option<Arc<Subscription>> {
        let mut guard = self.subs.lock().unwrap();
        let idx = guard.iter().position(|s| s.id == id)?;
        Some(guard.remove(idx))
    }

    pub fn get_by_id(&self, id: u64) -> Option<Arc<Subscription>> {
        self.subs.lock().unwrap().iter().find(|s| s.id == id).cloned()
    }

    pub fn get_by_request(&self, predicate: impl Fn(&Value) -> bool) -> Option<Arc<Subscription>> {
        self.subs
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.request.as_ref().is_some_and(&predicate))
            .cloned()
    }

    /// A snapshot taken under the lock, for the dispatcher or reconnect
    /// loop to iterate over outside of it.
    pub fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.subs.lock().unwrap().clone()
    }

    pub fn count_user(&self) -> usize {
        self.subs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.user_subscription)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(value: Value) -> ParsedFrame {
        ParsedFrame {
            value,
            raw: None,
            received_at: Utc::now(),
            connection_id: Arc::from("conn-1"),
        }
    }

    #[test]
    fn add_get_remove_round_trip() {
        let registry = SubscriptionRegistry::new();
        let sub = Arc::new(
            Subscription::builder()
                .identifier("ticker")
                .handler(|_| Ok(()))
                .build(),
        );
        let id = sub.id;
        registry.add(sub);

        assert!(registry.get_by_id(id).is_some());
        assert_eq!(registry.snapshot().len(), 1);

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.id, id);
        assert!(registry.is_empty());
    }

    #[test]
    fn count_user_excludes_system_subscriptions() {
        let registry = SubscriptionRegistry::new();
        registry.add(Arc::new(
            Subscription::builder()
                .identifier("user-sub")
                .user_subscription(true)
                .handler(|_| Ok(()))
                .build(),
        ));
        registry.add(Arc::new(
            Subscription::builder()
                .identifier("housekeeping")
                .user_subscription(false)
                .handler(|_| Ok(()))
                .build(),
        ));

        assert_eq!(registry.count_user(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn handler_error_is_routed_to_exception_handler() {
        use std::sync::atomic::AtomicBool as Flag;
        let saw_error = Arc::new(Flag::new(false));
        let saw_error_clone = Arc::clone(&saw_error);

        let sub = Subscription::builder()
            .identifier("x")
            .handler(|_| Err(DispatchError::Handler("boom".into())))
            .exception_handler(move |_err, _frame| {
                saw_error_clone.store(true, Ordering::SeqCst);
            })
            .build();

        sub.dispatch(&frame(serde_json::json!({})));
        assert!(saw_error.load(Ordering::SeqCst));
    }

    #[test]
    fn handler_panic_is_caught_and_routed() {
        use std::sync::atomic::AtomicBool as Flag;
        let saw_panic = Arc::new(Flag::new(false));
        let saw_panic_clone = Arc::clone(&saw_panic);

        let sub = Subscription::builder()
            .identifier("x")
            .handler(|_| panic!("handler exploded"))
            .exception_handler(move |err, _frame| {
                saw_panic_clone.store(matches!(err, DispatchError::Panicked(_)), Ordering::SeqCst);
            })
            .build();

        sub.dispatch(&frame(serde_json::json!({})));
        assert!(saw_panic.load(Ordering::SeqCst));
    }

    #[test]
    fn dispose_runs_cancel_hook_at_most_once() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let sub = Subscription::builder()
            .identifier("x")
            .handler(|_| Ok(()))
            .cancel_hook(move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        sub.dispose();
        sub.dispose();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
