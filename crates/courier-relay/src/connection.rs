//! Live connection handles.
//!
//! A [`ConnectionHandle`] owns the outbound side of one transport connection
//! and the table of events still waiting for the peer's acknowledgment.
//! [`Peer::emit_with_ack`] is the bounded-wait primitive the dispatcher is
//! built on: it resolves exactly once, with success, a timeout, or a closed
//! connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::protocol::{OutboundEvent, ServerFrame};
use crate::RelayError;

/// Opaque identity of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something the relay can push events to.
#[async_trait]
pub trait Peer: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnId;

    /// Send an event and wait up to `deadline` for the peer to acknowledge it.
    async fn emit_with_ack(
        &self,
        event: &OutboundEvent,
        deadline: Duration,
    ) -> Result<(), RelayError>;
}

pub type PeerRef = Arc<dyn Peer>;

/// Channel-backed connection with acknowledgment tracking.
pub struct ConnectionHandle {
    id: ConnId,
    outbound: mpsc::Sender<ServerFrame>,
    pending_acks: DashMap<u64, oneshot::Sender<()>>,
    next_ack_id: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id: ConnId::new(),
            outbound,
            pending_acks: DashMap::new(),
            next_ack_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolve a pending acknowledgment.
    ///
    /// Returns false for unknown or already-expired ids.
    pub fn acknowledge(&self, ack_id: u64) -> bool {
        match self.pending_acks.remove(&ack_id) {
            Some((_, waiter)) => waiter.send(()).is_ok(),
            None => {
                trace!(conn = %self.id, ack_id, "Ack for unknown or expired event");
                false
            }
        }
    }

    /// Reply to a client request.
    pub async fn reply(&self, request_id: u64, data: Value) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }
        self.outbound
            .send(ServerFrame::Ack {
                ack: request_id,
                data,
            })
            .await
            .map_err(|_| RelayError::ConnectionClosed)
    }

    /// Mark the connection closed and fail every pending acknowledgment wait.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let pending = self.pending_acks.len();
        // Dropping the senders wakes the waiters with a receive error.
        self.pending_acks.clear();
        if pending > 0 {
            debug!(conn = %self.id, pending, "Dropped pending acknowledgments on close");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.outbound.is_closed()
    }

    /// Number of events still waiting for an acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.pending_acks.len()
    }
}

#[async_trait]
impl Peer for ConnectionHandle {
    fn id(&self) -> ConnId {
        self.id
    }

    async fn emit_with_ack(
        &self,
        event: &OutboundEvent,
        deadline: Duration,
    ) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }

        let ack_id = self.next_ack_id.fetch_add(1, Ordering::Relaxed);
        let frame = event.to_frame(ack_id)?;
        let (waiter, acked) = oneshot::channel();
        self.pending_acks.insert(ack_id, waiter);
        let _pending = PendingAck {
            table: &self.pending_acks,
            ack_id,
        };

        let outcome = tokio::time::timeout(deadline, async {
            self.outbound
                .send(frame)
                .await
                .map_err(|_| RelayError::ConnectionClosed)?;
            acked.await.map_err(|_| RelayError::ConnectionClosed)
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(RelayError::AckTimeout(deadline)),
        }
    }
}

/// Removes a pending-ack entry when the wait ends, including when the
/// waiting future is dropped.
struct PendingAck<'a> {
    table: &'a DashMap<u64, oneshot::Sender<()>>,
    ack_id: u64,
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.ack_id);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("pending_acks", &self.pending_acks.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
