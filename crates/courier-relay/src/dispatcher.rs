//! Acknowledgment-bounded dispatch.
//!
//! A dispatch either gets acknowledged within the deadline or counts as failed.
//! A failed peer is assumed gone and is evicted from the presence registry right
//! away; peers can vanish without a clean close (power loss, network partition).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::connection::PeerRef;
use crate::protocol::OutboundEvent;
use crate::registry::PresenceRegistry;

/// Default deadline for a peer to acknowledge a pushed event.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Result of a dispatch. Timeouts and transport errors are deliberately not told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed,
}

impl DispatchOutcome {
    pub fn is_delivered(self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<PresenceRegistry>,
    ack_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<PresenceRegistry>, ack_timeout: Duration) -> Self {
        Self {
            registry,
            ack_timeout,
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Push `event` to `peer` and wait for its acknowledgment.
    #[instrument(skip(self, peer, event), fields(conn = %peer.id(), event = event.name()))]
    pub async fn dispatch(&self, peer: &PeerRef, event: &OutboundEvent) -> DispatchOutcome {
        match peer.emit_with_ack(event, self.ack_timeout).await {
            Ok(()) => {
                debug!("Event acknowledged");
                DispatchOutcome::Delivered
            }
            Err(err) => {
                debug!(error = %err, "Dispatch failed, evicting connection");
                if let Some(username) = self.registry.unregister(peer.id()) {
                    info!(
                        username = %username,
                        online = ?self.registry.online_usernames(),
                        "User evicted after failed dispatch"
                    );
                }
                DispatchOutcome::Failed
            }
        }
    }
}
