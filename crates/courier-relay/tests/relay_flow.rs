//! End-to-end relay flows driven through sessions.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    router_with, router_with_config, FailingBlobStore, RecordingBlobStore, TestClient,
};
use courier_relay::{
    BlobStore, ClientFrame, ObjectBlobStore, RelayConfig, ServerFrame, ANONYMOUS_SENDER,
};
use serde_json::{json, Value};

const ACK_TIMEOUT: Duration = Duration::from_millis(1000);
const SHORT_ACK_TIMEOUT: Duration = Duration::from_millis(100);
const QUIET: Duration = Duration::from_millis(150);

#[tokio::test]
async fn test_text_message_delivered() {
    let router = router_with(ACK_TIMEOUT, Arc::new(ObjectBlobStore::in_memory()));
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);

    assert!(alice.login("alice").await);
    assert!(bob.login("bob").await);

    assert!(alice.send_text("h1", "bob", "hi").await);

    let delivered = bob.expect_event("msg").await;
    assert_eq!(
        delivered,
        json!({
            "content": "hi",
            "type": "msg",
            "from_username": "alice",
            "msg_hash": "h1"
        })
    );

    let receipt = alice.expect_event("msg_sent").await;
    assert_eq!(receipt, json!({ "msg_hash": "h1" }));

    alice.expect_silence(QUIET).await;
    bob.expect_silence(QUIET).await;
}

#[tokio::test]
async fn test_unknown_recipient_is_offline() {
    let blobs = Arc::new(RecordingBlobStore::new());
    let router = router_with(ACK_TIMEOUT, blobs.clone());
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    assert!(alice.send_text("h2", "carol", "anyone?").await);

    let receipt = alice.expect_event("offline_recipient").await;
    assert_eq!(receipt, json!({ "msg_hash": "h2" }));
    alice.expect_silence(QUIET).await;
    bob.expect_silence(QUIET).await;

    // Files to an offline recipient are never uploaded.
    assert!(alice.send_file("h3", "carol", "a.txt", "x").await);
    alice.expect_event("offline_recipient").await;
    assert_eq!(blobs.put_count(), 0);
}

#[tokio::test]
async fn test_unresponsive_recipient_is_evicted() {
    let router = router_with(SHORT_ACK_TIMEOUT, Arc::new(ObjectBlobStore::in_memory()));
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    assert!(alice.send_text("h4", "bob", "are you there?").await);

    // Bob sees the push but never acknowledges it.
    let (event, _, _) = bob.next_event().await;
    assert_eq!(event, "msg");

    let receipt = alice.expect_event("offline_recipient").await;
    assert_eq!(receipt, json!({ "msg_hash": "h4" }));

    assert!(router.registry().lookup("bob").is_none());
    assert!(router.registry().username_of(bob.session().id()).is_none());
    assert_eq!(router.registry().online_usernames(), vec!["alice"]);
}

#[tokio::test]
async fn test_path_separator_in_file_name_rejected() {
    let blobs = Arc::new(RecordingBlobStore::new());
    let router = router_with(ACK_TIMEOUT, blobs.clone());
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    assert!(alice.send_file("h5", "bob", "../etc", "root:x:0:0").await);

    let receipt = alice.expect_event("file_upload_fail").await;
    assert_eq!(receipt, json!({ "msg_hash": "h5" }));
    assert_eq!(blobs.put_count(), 0);
    bob.expect_silence(QUIET).await;
}

#[tokio::test]
async fn test_file_without_name_rejected() {
    let blobs = Arc::new(RecordingBlobStore::new());
    let router = router_with(ACK_TIMEOUT, blobs.clone());
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    let accepted = alice
        .request(
            "msg",
            json!({"msg_hash": "h6", "to_username": "bob", "content": "x", "type": "file"}),
        )
        .await;
    assert!(accepted);

    alice.expect_event("file_upload_fail").await;
    assert_eq!(blobs.put_count(), 0);
    bob.expect_silence(QUIET).await;
}

#[tokio::test]
async fn test_storage_failure_reports_upload_fail() {
    let router = router_with(ACK_TIMEOUT, Arc::new(FailingBlobStore));
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    assert!(alice.send_file("h7", "bob", "cat.png", "meow").await);

    alice.expect_event("file_upload_fail").await;
    bob.expect_silence(QUIET).await;
}

#[tokio::test]
async fn test_file_reference_delivered() {
    let blobs = Arc::new(RecordingBlobStore::new());
    let router = router_with(ACK_TIMEOUT, blobs.clone());
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    assert!(alice.send_file("h8", "bob", "cat.png", "meow").await);

    let delivered = bob.expect_event("msg").await;
    assert_eq!(
        delivered,
        json!({
            "content": "/bob/cat.png",
            "type": "file",
            "from_username": "alice",
            "msg_hash": "h8"
        })
    );
    alice.expect_event("msg_sent").await;

    assert_eq!(blobs.put_count(), 1);
    let stored = blobs.get("bob", "cat.png").await.unwrap();
    assert_eq!(stored.as_deref(), Some(&b"meow"[..]));
}

#[tokio::test]
async fn test_file_confirmed_even_if_recipient_misses_it() {
    let blobs = Arc::new(RecordingBlobStore::new());
    let router = router_with(SHORT_ACK_TIMEOUT, blobs.clone());
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    assert!(alice.send_file("h9", "bob", "cat.png", "meow").await);
    let _unacked = bob.next_event().await;

    // Exactly one terminal event, and it is msg_sent.
    let receipt = alice.expect_event("msg_sent").await;
    assert_eq!(receipt, json!({ "msg_hash": "h9" }));
    alice.expect_silence(QUIET).await;

    assert_eq!(blobs.put_count(), 1);
    assert!(router.registry().lookup("bob").is_none());
}

#[tokio::test]
async fn test_second_login_takes_over_username() {
    let router = router_with(ACK_TIMEOUT, Arc::new(ObjectBlobStore::in_memory()));
    let mut alice = TestClient::connect(&router);
    let mut bob_phone = TestClient::connect(&router);
    let mut bob_laptop = TestClient::connect(&router);
    alice.login("alice").await;
    bob_phone.login("bob").await;
    bob_laptop.login("bob").await;

    let registered = router.registry().lookup("bob").unwrap();
    assert_eq!(registered.id(), bob_laptop.session().id());
    assert!(router
        .registry()
        .username_of(bob_phone.session().id())
        .is_none());

    alice.send_text("h10", "bob", "which one?").await;
    bob_laptop.expect_event("msg").await;
    alice.expect_event("msg_sent").await;
    bob_phone.expect_silence(QUIET).await;

    // The superseded connection closing does not log bob out.
    assert!(bob_phone.disconnect().await.is_none());
    assert!(router.registry().lookup("bob").is_some());
}

#[tokio::test]
async fn test_anonymous_sender() {
    let router = router_with(ACK_TIMEOUT, Arc::new(ObjectBlobStore::in_memory()));
    let mut stranger = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    bob.login("bob").await;

    assert!(stranger.send_text("h11", "bob", "psst").await);

    let delivered = bob.expect_event("msg").await;
    assert_eq!(delivered["from_username"], ANONYMOUS_SENDER);
    stranger.expect_event("msg_sent").await;
}

#[tokio::test]
async fn test_unresponsive_sender_is_evicted() {
    let router = router_with(SHORT_ACK_TIMEOUT, Arc::new(ObjectBlobStore::in_memory()));
    let mut alice = TestClient::connect(&router);
    alice.login("alice").await;

    assert!(alice.send_text("h12", "carol", "hello?").await);

    // Alice ignores her own receipt and gets pruned for it.
    let (event, _, _) = alice.next_event().await;
    assert_eq!(event, "offline_recipient");
    tokio::time::sleep(SHORT_ACK_TIMEOUT * 3).await;

    assert!(router.registry().lookup("alice").is_none());
}

#[tokio::test]
async fn test_disconnect_without_login_is_noop() {
    let router = router_with(ACK_TIMEOUT, Arc::new(ObjectBlobStore::in_memory()));
    let mut bob = TestClient::connect(&router);
    let mut stranger = TestClient::connect(&router);
    bob.login("bob").await;

    assert!(stranger.disconnect().await.is_none());
    assert_eq!(router.registry().online_usernames(), vec!["bob"]);

    assert_eq!(bob.disconnect().await.as_deref(), Some("bob"));
    assert!(router.registry().is_empty());
}

#[tokio::test]
async fn test_recipient_disconnect_fails_dispatch_fast() {
    // Long deadline: the failure must come from the disconnect, not the timer.
    let router = router_with(Duration::from_secs(10), Arc::new(ObjectBlobStore::in_memory()));
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    assert!(alice.send_text("h13", "bob", "bye?").await);
    let _pending = bob.next_event().await;

    let started = Instant::now();
    bob.disconnect().await;

    alice.expect_event("offline_recipient").await;
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_requests_of_one_connection_are_serialized() {
    let router = router_with(ACK_TIMEOUT, Arc::new(ObjectBlobStore::in_memory()));
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    assert!(alice.send_text("first", "bob", "1").await);

    // While the first message waits on bob's ack, the second is only queued.
    alice
        .session()
        .handle_frame(ClientFrame::Event {
            event: "msg".to_string(),
            data: json!({
                "msg_hash": "second",
                "to_username": "bob",
                "content": "2",
                "type": "msg"
            }),
            id: Some(99),
        })
        .await
        .unwrap();

    let (event, data, id) = bob.next_event().await;
    assert_eq!(event, "msg");
    assert_eq!(data["msg_hash"], "first");
    bob.expect_silence(QUIET).await;
    bob.ack(id).await;

    assert_eq!(alice.expect_event("msg_sent").await["msg_hash"], "first");
    match alice.next_frame().await {
        ServerFrame::Ack { ack, data } => {
            assert_eq!(ack, 99);
            assert_eq!(data, Value::Bool(true));
        }
        other => panic!("expected reply to the second request, got {:?}", other),
    }

    assert_eq!(bob.expect_event("msg").await["msg_hash"], "second");
    assert_eq!(alice.expect_event("msg_sent").await["msg_hash"], "second");
}

#[tokio::test]
async fn test_accepted_message_survives_sender_disconnect() {
    let router = router_with(ACK_TIMEOUT, Arc::new(ObjectBlobStore::in_memory()));
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    alice.push_text("h14", "bob", "fire and forget", None).await;
    let closing = tokio::spawn(async move { alice.disconnect().await });

    let delivered = bob.expect_event("msg").await;
    assert_eq!(delivered["msg_hash"], "h14");
    assert_eq!(delivered["from_username"], "alice");

    assert_eq!(closing.await.unwrap().as_deref(), Some("alice"));
    assert!(router.registry().lookup("alice").is_none());
    assert!(router.registry().lookup("bob").is_some());
}

#[tokio::test]
async fn test_sender_disconnect_still_evicts_silent_recipient() {
    let router = router_with(SHORT_ACK_TIMEOUT, Arc::new(ObjectBlobStore::in_memory()));
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    assert!(alice.send_text("h15", "bob", "hello?").await);
    let (event, _, _) = bob.next_event().await;
    assert_eq!(event, "msg");

    // Closing waits for the pending dispatch to run out its deadline.
    assert_eq!(alice.disconnect().await.as_deref(), Some("alice"));

    assert!(router.registry().lookup("bob").is_none());
    assert!(router.registry().is_empty());
}

#[tokio::test]
async fn test_full_request_queue_rejects_without_blocking_acks() {
    let config = RelayConfig {
        request_queue_depth: 1,
        ..RelayConfig::default()
    };
    let router = router_with_config(config, Arc::new(ObjectBlobStore::in_memory()));
    let mut alice = TestClient::connect(&router);
    let mut bob = TestClient::connect(&router);
    alice.login("alice").await;
    bob.login("bob").await;

    // The worker picks up the first message and parks on bob's ack.
    assert!(alice.send_text("q1", "bob", "1").await);
    let (_, first, first_id) = bob.next_event().await;
    assert_eq!(first["msg_hash"], "q1");

    // The second fills the queue, the third is refused straight away.
    alice.push_text("q2", "bob", "2", Some(20)).await;
    let refused = tokio::time::timeout(
        Duration::from_millis(500),
        alice.request(
            "msg",
            json!({"msg_hash": "q3", "to_username": "bob", "content": "3", "type": "msg"}),
        ),
    )
    .await
    .expect("full queue must not block the reader");
    assert!(!refused);

    // Acks still flow, so nobody gets evicted.
    bob.ack(first_id).await;
    assert_eq!(alice.expect_event("msg_sent").await["msg_hash"], "q1");
    match alice.next_frame().await {
        ServerFrame::Ack { ack, data } => {
            assert_eq!(ack, 20);
            assert_eq!(data, Value::Bool(true));
        }
        other => panic!("expected reply to the queued request, got {:?}", other),
    }
    assert_eq!(bob.expect_event("msg").await["msg_hash"], "q2");
    assert_eq!(alice.expect_event("msg_sent").await["msg_hash"], "q2");

    assert_eq!(router.registry().online_usernames(), vec!["alice", "bob"]);
}
