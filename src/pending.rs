//! Pending-request registry: correlates outgoing requests with inbound
//! frames via predicate matching and a deadline.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::PendingError;
use crate::frame::ParsedFrame;

static NEXT_PENDING_ID: AtomicU64 = AtomicU64::new(1);

/// What a pending request was ultimately signalled with.
#[derive(Debug)]
enum PendingOutcome {
    Matched(ParsedFrame),
    TimedOut,
    ClosedBeforeMatch,
}

/// A single in-flight `send_and_wait` correlation entry.
///
/// Completion is single-producer, single-consumer (`tokio::sync::oneshot`)
/// so the "signalled exactly once" invariant is enforced by the channel
/// type itself: a second `send` is simply a no-op `Err` the producer
/// ignores, rather than a logic error to guard against by hand.
struct PendingEntry {
    id: u64,
    predicate: Box<dyn Fn(&ParsedFrame) -> bool + Send + Sync>,
    completed: AtomicBool,
    responder: Mutex<Option<oneshot::Sender<PendingOutcome>>>,
    deadline_task: Mutex<Option<JoinHandle<()>>>,
}

impl PendingEntry {
    /// Signal the waiter, if it has not already been signalled, and
    /// cancel the deadline timer so it cannot fire a late spurious
    /// signal after this one.
    fn complete(&self, outcome: PendingOutcome) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.deadline_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(tx) = self.responder.lock().unwrap().take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Ordered collection of in-flight `send_and_wait` entries for one
/// connection.
#[derive(Default)]
pub struct PendingRegistry {
    entries: Mutex<Vec<Arc<PendingEntry>>>,
}

/// Caller-facing handle returned by [`PendingRegistry::register`].
pub struct PendingHandle {
    rx: oneshot::Receiver<PendingOutcome>,
}

impl PendingHandle {
    /// Await the outcome: a matching frame, the deadline, or a
    /// connection-close sweep. All three paths are guaranteed — the
    /// sender side is never dropped without first sending.
    pub async fn wait(self) -> Result<ParsedFrame, PendingError> {
        match self.rx.await {
            Ok(PendingOutcome::Matched(frame)) => Ok(frame),
            Ok(PendingOutcome::TimedOut) => Err(PendingError::Timeout),
            Ok(PendingOutcome::ClosedBeforeMatch) => Err(PendingError::ClosedBeforeMatch),
            // The registry was dropped without signalling — treat as a close sweep.
            Err(_) => Err(PendingError::ClosedBeforeMatch),
        }
    }
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new correlation entry, arming its deadline.
    pub fn register(
        &self,
        predicate: impl Fn(&ParsedFrame) -> bool + Send + Sync + 'static,
        timeout: Duration,
    ) -> PendingHandle {
        let id = NEXT_PENDING_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let entry = Arc::new(PendingEntry {
            id,
            predicate: Box::new(predicate),
            completed: AtomicBool::new(false),
            responder: Mutex::new(Some(tx)),
            deadline_task: Mutex::new(None),
        });

        let deadline_entry = Arc::clone(&entry);
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline_entry.complete(PendingOutcome::TimedOut);
        });
        *entry.deadline_task.lock().unwrap() = Some(task);

        self.entries.lock().unwrap().push(entry);
        PendingHandle { rx }
    }

    /// Sweep completed entries, then attempt to correlate `frame` against
    /// the remaining ones in insertion order. The first match consumes
    /// the frame and is reported via the return value; whether dispatch
    /// should *also* continue to subscription fan-out is a policy
    /// decision the dispatcher makes from `ConnectionOptions`, not this
    /// registry.
    pub fn check_and_sweep(&self, frame: &ParsedFrame) -> bool {
        let snapshot: Vec<Arc<PendingEntry>> = {
            let mut guard = self.entries.lock().unwrap();
            guard.retain(|e| !e.completed.load(Ordering::SeqCst));
            guard.clone()
        };

        for entry in &snapshot {
            if (entry.predicate)(frame) {
                entry.complete(PendingOutcome::Matched(frame.clone()));
                self.entries.lock().unwrap().retain(|e| e.id != entry.id);
                return true;
            }
        }

        false
    }

    /// Signal every outstanding entry with no result. Called on transport
    /// close so no `send_and_wait` caller is left hanging forever.
    pub fn fail_all(&self) {
        let drained: Vec<Arc<PendingEntry>> = {
            let mut guard = self.entries.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for entry in drained {
            entry.complete(PendingOutcome::ClosedBeforeMatch);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(value: serde_json::Value) -> ParsedFrame {
        ParsedFrame {
            value,
            raw: None,
            received_at: Utc::now(),
            connection_id: Arc::from("conn-1"),
        }
    }

    #[tokio::test]
    async fn matching_frame_resolves_the_waiter() {
        let registry = PendingRegistry::new();
        let handle = registry.register(|f| f.value["id"] == 7, Duration::from_secs(2));

        let f = frame(serde_json::json!({"id": 7, "ok": true}));
        assert!(registry.check_and_sweep(&f));

        let resolved = handle.wait().await.unwrap();
        assert_eq!(resolved.value["id"], 7);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn non_matching_frame_continues_dispatch() {
        let registry = PendingRegistry::new();
        let _handle = registry.register(|f| f.value["id"] == 7, Duration::from_secs(2));

        let f = frame(serde_json::json!({"id": 1}));
        assert!(!registry.check_and_sweep(&f));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn deadline_signals_timeout_and_is_swept_on_next_frame() {
        let registry = PendingRegistry::new();
        let handle = registry.register(|_| false, Duration::from_millis(20));

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err, PendingError::Timeout);

        // Give the entry's own completion a moment to land before sweeping.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let f = frame(serde_json::json!({"id": 99}));
        let _ = registry.check_and_sweep(&f);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn fail_all_signals_every_outstanding_entry() {
        let registry = PendingRegistry::new();
        let h1 = registry.register(|_| false, Duration::from_secs(5));
        let h2 = registry.register(|_| false, Duration::from_secs(5));

        registry.fail_all();

        assert_eq!(h1.wait().await.unwrap_err(), PendingError::ClosedBeforeMatch);
        assert_eq!(h2.wait().await.unwrap_err(), PendingError::ClosedBeforeMatch);
        assert!(registry.is_empty());
    }
}
