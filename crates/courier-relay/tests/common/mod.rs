//! Test utilities for relay flow testing.
//!
//! Provides in-process clients driving a [`Session`] over channels, and blob
//! stores that record or fail uploads.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_relay::{
    BlobStore, ClientFrame, MessageRouter, ObjectBlobStore, RelayConfig, RelayError,
    ServerFrame, Session,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("courier_relay=debug")
        .with_test_writer()
        .try_init();
}

pub fn router_with(ack_timeout: Duration, blobs: Arc<dyn BlobStore>) -> Arc<MessageRouter> {
    router_with_config(RelayConfig::default().with_ack_timeout(ack_timeout), blobs)
}

pub fn router_with_config(config: RelayConfig, blobs: Arc<dyn BlobStore>) -> Arc<MessageRouter> {
    init_tracing();
    Arc::new(MessageRouter::new(&config, blobs))
}

/// Blob store that counts writes.
pub struct RecordingBlobStore {
    inner: ObjectBlobStore,
    puts: AtomicUsize,
}

impl RecordingBlobStore {
    pub fn new() -> Self {
        Self {
            inner: ObjectBlobStore::in_memory(),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn put(&self, owner: &str, file: &str, bytes: Bytes) -> Result<(), RelayError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(owner, file, bytes).await
    }

    async fn get(&self, owner: &str, file: &str) -> Result<Option<Bytes>, RelayError> {
        self.inner.get(owner, file).await
    }
}

/// Blob store whose backend is always down.
pub struct FailingBlobStore;

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, owner: &str, file: &str, _bytes: Bytes) -> Result<(), RelayError> {
        Err(RelayError::UploadFailure {
            key: format!("{}/{}", owner, file),
            source: object_store::Error::Generic {
                store: "test",
                source: "backend down".into(),
            },
        })
    }

    async fn get(&self, owner: &str, file: &str) -> Result<Option<Bytes>, RelayError> {
        Err(RelayError::StorageUnavailable {
            key: format!("{}/{}", owner, file),
            source: object_store::Error::Generic {
                store: "test",
                source: "backend down".into(),
            },
        })
    }
}

/// In-process client speaking the frame protocol to a [`Session`].
pub struct TestClient {
    session: Option<Session>,
    frames: mpsc::Receiver<ServerFrame>,
    next_request_id: u64,
}

impl TestClient {
    pub fn connect(router: &Arc<MessageRouter>) -> Self {
        let (tx, frames) = mpsc::channel(router.config().outbound_buffer);
        Self {
            session: Some(Session::start(router.clone(), tx)),
            frames,
            next_request_id: 1,
        }
    }

    pub fn session(&self) -> &Session {
        self.session.as_ref().expect("session already finished")
    }

    /// Send a request and wait for its boolean reply.
    pub async fn request(&mut self, event: &str, data: Value) -> bool {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.session()
            .handle_frame(ClientFrame::Event {
                event: event.to_string(),
                data,
                id: Some(id),
            })
            .await
            .expect("session accepts frames");

        match self.next_frame().await {
            ServerFrame::Ack { ack, data } => {
                assert_eq!(ack, id, "reply for another request");
                data.as_bool().expect("boolean reply")
            }
            other => panic!("expected reply to request {}, got {:?}", id, other),
        }
    }

    pub async fn login(&mut self, user_name: &str) -> bool {
        self.request("login", json!({ "user_name": user_name })).await
    }

    pub async fn send_text(&mut self, msg_hash: &str, to: &str, content: &str) -> bool {
        self.request(
            "msg",
            json!({
                "msg_hash": msg_hash,
                "to_username": to,
                "content": content,
                "type": "msg"
            }),
        )
        .await
    }

    pub async fn send_file(
        &mut self,
        msg_hash: &str,
        to: &str,
        file_name: &str,
        content: &str,
    ) -> bool {
        self.request(
            "msg",
            json!({
                "msg_hash": msg_hash,
                "to_username": to,
                "content": content,
                "type": "file",
                "file_name": file_name
            }),
        )
        .await
    }

    pub async fn next_frame(&mut self) -> ServerFrame {
        timeout(DEFAULT_TIMEOUT, self.frames.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("session closed")
    }

    /// Receive the next pushed event without acknowledging it.
    pub async fn next_event(&mut self) -> (String, Value, u64) {
        match self.next_frame().await {
            ServerFrame::Event {
                event,
                data,
                id: Some(id),
            } => (event, data, id),
            other => panic!("expected pushed event, got {:?}", other),
        }
    }

    /// Queue a `msg` request without waiting for its reply.
    pub async fn push_text(&self, msg_hash: &str, to: &str, content: &str, id: Option<u64>) {
        self.session()
            .handle_frame(ClientFrame::Event {
                event: "msg".to_string(),
                data: json!({
                    "msg_hash": msg_hash,
                    "to_username": to,
                    "content": content,
                    "type": "msg"
                }),
                id,
            })
            .await
            .expect("session accepts frames");
    }

    pub async fn ack(&self, id: u64) {
        self.session()
            .handle_frame(ClientFrame::Ack { ack: id })
            .await
            .expect("session accepts frames");
    }

    /// Receive the next event, check its name, acknowledge it and return its data.
    pub async fn expect_event(&mut self, name: &str) -> Value {
        let (event, data, id) = self.next_event().await;
        assert_eq!(event, name, "unexpected event with data {}", data);
        self.ack(id).await;
        data
    }

    /// Assert nothing arrives for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(frame)) = timeout(window, self.frames.recv()).await {
            panic!("expected no frames, got {:?}", frame);
        }
    }

    /// Close the transport side.
    pub async fn disconnect(&mut self) -> Option<String> {
        let session = self.session.take().expect("session already finished");
        session.finish().await
    }
}
