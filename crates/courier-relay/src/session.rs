//! Per-connection session driver.
//!
//! Each transport connection gets one `Session`. Acks coming back from the
//! client are resolved inline, since the worker may itself be parked waiting
//! for one. Requests (login / msg) are queued to a single worker task so that
//! every request of a connection is processed to completion before the next.
//! A request arriving while the queue is full is answered `false` at once.
//!
//! ```text
//! transport ──► Session::handle_frame ──► {"ack"}   ──► ConnectionHandle::acknowledge
//!                                     └─► {"event"} ──► worker ──► MessageRouter
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::connection::{ConnId, ConnectionHandle, Peer, PeerRef};
use crate::protocol::{ClientFrame, InboundEvent, ServerFrame};
use crate::router::MessageRouter;
use crate::RelayError;

struct QueuedRequest {
    event: String,
    data: Value,
    id: Option<u64>,
}

pub struct Session {
    handle: Arc<ConnectionHandle>,
    router: Arc<MessageRouter>,
    requests: mpsc::Sender<QueuedRequest>,
    worker: JoinHandle<()>,
}

impl Session {
    /// Start a session whose outgoing frames are pushed into `outbound`.
    pub fn start(router: Arc<MessageRouter>, outbound: mpsc::Sender<ServerFrame>) -> Self {
        let handle = Arc::new(ConnectionHandle::new(outbound));
        let (requests, queue) = mpsc::channel(router.config().request_queue_depth);

        let span = tracing::info_span!("session", conn = %handle.id());
        let worker = tokio::spawn(
            run_worker(router.clone(), handle.clone(), queue).instrument(span),
        );
        debug!(conn = %handle.id(), "Session started");

        Self {
            handle,
            router,
            requests,
            worker,
        }
    }

    pub fn id(&self) -> ConnId {
        self.handle.id()
    }

    /// Feed one frame received from the client.
    pub async fn handle_frame(&self, frame: ClientFrame) -> Result<(), RelayError> {
        match frame {
            ClientFrame::Ack { ack } => {
                self.handle.acknowledge(ack);
                Ok(())
            }
            ClientFrame::Event { event, data, id } => {
                match self.requests.try_send(QueuedRequest { event, data, id }) {
                    Ok(()) => Ok(()),
                    // Never wait for queue space: acks behind this frame must stay readable.
                    Err(TrySendError::Full(request)) => {
                        warn!(
                            conn = %self.handle.id(),
                            event = %request.event,
                            "Request queue full, rejecting request"
                        );
                        reply(&self.handle, request.id, false).await;
                        Ok(())
                    }
                    Err(TrySendError::Closed(_)) => Err(RelayError::ConnectionClosed),
                }
            }
        }
    }

    /// Tear the session down after the transport closed.
    ///
    /// Requests already accepted are still routed to completion; events for
    /// this connection fail fast from here on. Returns the username that was
    /// logged in on this connection, if any.
    pub async fn finish(self) -> Option<String> {
        let Session {
            handle,
            router,
            requests,
            worker,
        } = self;

        let logged_in = router.registry().username_of(handle.id());

        drop(requests);
        handle.close();
        if let Err(err) = worker.await {
            warn!(conn = %handle.id(), error = %err, "Session worker failed");
        }

        // A failed dispatch while draining may already have evicted us.
        let username = router.disconnect(handle.id()).or(logged_in);
        debug!(conn = %handle.id(), "Session finished");
        username
    }
}

async fn run_worker(
    router: Arc<MessageRouter>,
    handle: Arc<ConnectionHandle>,
    mut queue: mpsc::Receiver<QueuedRequest>,
) {
    let peer: PeerRef = handle.clone();
    while let Some(request) = queue.recv().await {
        handle_request(&router, &handle, &peer, request).await;
    }
}

async fn handle_request(
    router: &MessageRouter,
    handle: &ConnectionHandle,
    peer: &PeerRef,
    request: QueuedRequest,
) {
    let QueuedRequest { event, data, id } = request;

    match InboundEvent::parse(&event, data) {
        Ok(InboundEvent::Login(login)) => {
            let accepted = router.login(peer.clone(), login);
            reply(handle, id, accepted).await;
        }
        Ok(InboundEvent::Msg(msg)) => {
            // Accepted now; the outcome follows as its own event.
            reply(handle, id, true).await;
            let outcome = router.route_message(peer, msg).await;
            debug!(?outcome, "Message routed");
        }
        Err(err) => {
            info!(event = %event, error = %err, "Rejected request");
            reply(handle, id, false).await;
        }
    }
}

async fn reply(handle: &ConnectionHandle, id: Option<u64>, accepted: bool) {
    let Some(id) = id else {
        return;
    };
    if let Err(err) = handle.reply(id, Value::Bool(accepted)).await {
        debug!(error = %err, "Could not deliver reply");
    }
}
