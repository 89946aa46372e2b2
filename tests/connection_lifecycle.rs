//! End-to-end lifecycle tests driven against [`MockTransport`] — no
//! network access required.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use wavelink_core::prelude::*;

struct StubParent {
    removed: Mutex<Vec<String>>,
}

impl StubParent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            removed: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ParentClient for StubParent {
    async fn authenticate(&self, _connection: &Connection) -> bool {
        true
    }

    async fn subscribe_and_wait(&self, connection: &Connection, subscription: &Subscription) -> bool {
        if let Some(req) = &subscription.request {
            connection.send(&req.to_string());
        }
        true
    }

    async fn unsubscribe(&self, connection: &Connection, subscription: &Subscription) {
        if subscription.request.is_some() {
            connection.send(&format!(r#"{{"op":"unsubscribe","id":{}}}"#, subscription.id));
        }
    }

    fn matches(&self, frame: &ParsedFrame, key: SubscriptionKey<'_>) -> bool {
        default_matches(frame, key)
    }

    fn remove_connection(&self, transport_id: &str) {
        self.removed.lock().unwrap().push(transport_id.to_string());
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition never became true");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn happy_path_dispatches_to_a_subscription() {
    let (transport, handle) = MockTransport::new(vec![true]);
    let transport = Arc::new(transport);
    let parent = StubParent::new();

    let received = Arc::new(AtomicU32::new(0));
    let received_clone = Arc::clone(&received);

    let conn = Connection::open(
        "conn-a",
        Arc::clone(&transport) as Arc<dyn Transport>,
        handle.events,
        parent.clone(),
        Arc::new(JsonCodec),
        ConnectionOptions::default(),
        None,
    );

    wait_until(|| conn.is_connected()).await;

    let sub = conn.add_subscription(
        Subscription::builder()
            .identifier("ticker")
            .user_subscription(true)
            .handler(move |_f| {
                received_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build(),
    );
    assert_eq!(conn.subscription_count(), 1);

    transport.push_message(r#"{"channel":"ticker","price":1}"#);
    wait_until(|| received.load(Ordering::SeqCst) == 1).await;

    conn.close_subscription(&sub).await;
    wait_until(|| conn.subscription_count() == 0).await;
}

#[tokio::test]
async fn request_response_correlation_resolves_send_and_wait() {
    let (transport, handle) = MockTransport::new(vec![true]);
    let transport = Arc::new(transport);
    let parent = StubParent::new();

    let conn = Connection::open(
        "conn-b",
        Arc::clone(&transport) as Arc<dyn Transport>,
        handle.events,
        parent,
        Arc::new(JsonCodec),
        ConnectionOptions::default(),
        None,
    );
    wait_until(|| conn.is_connected()).await;

    let wait = conn.send_and_wait(
        r#"{"op":"ping","id":42}"#,
        Duration::from_secs(1),
        |f| f.value["id"] == 42,
    );

    transport.push_message(r#"{"id":42,"pong":true}"#);
    let resolved = wait.await.expect("should resolve");
    assert_eq!(resolved.value["pong"], true);
}

#[tokio::test]
async fn pending_request_times_out_without_a_matching_frame() {
    let (transport, handle) = MockTransport::new(vec![true]);
    let transport = Arc::new(transport);
    let parent = StubParent::new();

    let conn = Connection::open(
        "conn-c",
        Arc::clone(&transport) as Arc<dyn Transport>,
        handle.events,
        parent,
        Arc::new(JsonCodec),
        ConnectionOptions::default(),
        None,
    );
    wait_until(|| conn.is_connected()).await;

    let err = conn
        .send_and_wait(r#"{"op":"ping"}"#, Duration::from_millis(30), |f| f.value["id"] == 99)
        .await
        .unwrap_err();
    assert_eq!(err, PendingError::Timeout);
}

#[tokio::test]
async fn outage_and_recovery_emits_lost_then_restored() {
    let (transport, handle) = MockTransport::new(vec![true]);
    let transport = Arc::new(transport);
    let parent = StubParent::new();

    let events_seen = Arc::new(Mutex::new(Vec::new()));
    let events_seen_clone = Arc::clone(&events_seen);

    let conn = Connection::open(
        "conn-d",
        Arc::clone(&transport) as Arc<dyn Transport>,
        handle.events,
        parent,
        Arc::new(JsonCodec),
        ConnectionOptions::builder()
            .reconnect_interval(Duration::from_millis(10))
            .build(),
        None,
    );
    conn.on_event(move |e: &ConnectionEvent| {
        events_seen_clone.lock().unwrap().push(format!("{e:?}"));
    });
    wait_until(|| conn.is_connected()).await;

    transport.simulate_close();
    wait_until(|| {
        let seen = events_seen.lock().unwrap();
        seen.iter().any(|e| e.contains("ConnectionRestored"))
    })
    .await;

    let seen = events_seen.lock().unwrap().clone();
    assert!(seen.iter().any(|e| e.contains("ConnectionLost")));
    assert!(seen.iter().any(|e| e.contains("ConnectionRestored")));
    assert!(conn.is_connected());
}

#[tokio::test]
async fn exhausting_the_reconnect_cap_gives_up_terminally() {
    let (transport, handle) = MockTransport::new(vec![false, false, false]);
    let transport = Arc::new(transport);
    let parent = StubParent::new();

    let closed = Arc::new(AtomicU32::new(0));
    let closed_clone = Arc::clone(&closed);

    let conn = Connection::open(
        "conn-e",
        Arc::clone(&transport) as Arc<dyn Transport>,
        handle.events,
        parent,
        Arc::new(JsonCodec),
        ConnectionOptions::builder()
            .reconnect_interval(Duration::from_millis(5))
            .max_reconnect_tries(Some(2))
            .build(),
        None,
    );
    conn.on_event(move |e: &ConnectionEvent| {
        if matches!(e, ConnectionEvent::Closed) {
            closed_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    timeout(Duration::from_secs(2), wait_until(|| closed.load(Ordering::SeqCst) == 1))
        .await
        .expect("should give up within the timeout");
    assert!(!conn.is_connected());
}
