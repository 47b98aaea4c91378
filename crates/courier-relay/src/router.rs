//! Message routing.
//!
//! The `MessageRouter` interprets inbound login / msg / disconnect events,
//! consults the presence registry and drives the dispatcher.
//!
//! # Routing Logic
//!
//! For each `msg` request, the router:
//! 1. Looks up the recipient; if absent the sender gets `offline_recipient`
//! 2. For text, dispatches `msg` to the recipient; the sender gets `msg_sent`
//!    on acknowledgment or `offline_recipient` on failure
//! 3. For files, stores the attachment first; on failure the sender gets
//!    `file_upload_fail` and nothing is forwarded. Otherwise the recipient is
//!    sent a `/owner/file` reference and the sender gets `msg_sent`
//!
//! The recipient dispatch always completes before the sender's terminal event
//! is emitted, and each request yields exactly one terminal event.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, instrument, warn};

use crate::config::RelayConfig;
use crate::connection::{ConnId, PeerRef};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::protocol::{
    DeliveredMessage, LoginRequest, MessageKind, MsgRequest, OutboundEvent, Receipt,
};
use crate::registry::PresenceRegistry;
use crate::storage::{validate_name, BlobStore};
use crate::RelayError;

/// Reported as `from_username` when the sender never logged in.
pub const ANONYMOUS_SENDER: &str = "anonymous sender";

/// Terminal event sent to the sender for one `msg` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// `msg_sent`
    Sent,
    /// `offline_recipient`
    RecipientOffline,
    /// `file_upload_fail`
    UploadFailed,
}

impl RouteOutcome {
    fn into_event(self, msg_hash: String) -> OutboundEvent {
        let receipt = Receipt::new(msg_hash);
        match self {
            RouteOutcome::Sent => OutboundEvent::MsgSent(receipt),
            RouteOutcome::RecipientOffline => OutboundEvent::OfflineRecipient(receipt),
            RouteOutcome::UploadFailed => OutboundEvent::FileUploadFail(receipt),
        }
    }
}

pub struct MessageRouter {
    config: RelayConfig,
    registry: Arc<PresenceRegistry>,
    dispatcher: Dispatcher,
    blobs: Arc<dyn BlobStore>,
}

impl MessageRouter {
    /// Create a router owning a fresh presence registry.
    pub fn new(config: &RelayConfig, blobs: Arc<dyn BlobStore>) -> Self {
        Self::with_registry(Arc::new(PresenceRegistry::new()), config, blobs)
    }

    pub fn with_registry(
        registry: Arc<PresenceRegistry>,
        config: &RelayConfig,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry.clone(), config.ack_timeout);
        Self {
            config: config.clone(),
            registry,
            dispatcher,
            blobs,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Register `peer` under the requested username. Always succeeds.
    #[instrument(
        skip(self, peer, request),
        fields(conn = %peer.id(), username = %request.user_name)
    )]
    pub fn login(&self, peer: PeerRef, request: LoginRequest) -> bool {
        let conn_id = peer.id();
        self.registry.unregister(conn_id);
        self.registry.register(&request.user_name, peer);
        info!("User logged in");
        true
    }

    /// Unregister a closed connection.
    #[instrument(skip(self))]
    pub fn disconnect(&self, conn_id: ConnId) -> Option<String> {
        let username = self.registry.unregister(conn_id)?;
        info!(
            username = %username,
            online = ?self.registry.online_usernames(),
            "User logged out"
        );
        Some(username)
    }

    /// Route one `msg` request and notify the sender of the outcome.
    #[instrument(
        skip(self, sender, request),
        fields(
            conn = %sender.id(),
            msg_hash = %request.msg_hash,
            to = %request.to_username,
            kind = ?request.kind
        )
    )]
    pub async fn route_message(&self, sender: &PeerRef, request: MsgRequest) -> RouteOutcome {
        let MsgRequest {
            msg_hash,
            to_username,
            content,
            kind,
            file_name,
        } = request;

        let outcome = match self.registry.lookup(&to_username) {
            None => {
                info!("Recipient is offline");
                RouteOutcome::RecipientOffline
            }
            Some(recipient) => {
                let from_username = self
                    .registry
                    .username_of(sender.id())
                    .unwrap_or_else(|| ANONYMOUS_SENDER.to_string());

                match kind {
                    MessageKind::Msg => {
                        self.forward_text(&recipient, content, from_username, &msg_hash)
                            .await
                    }
                    MessageKind::File => {
                        self.forward_file(
                            &recipient,
                            &to_username,
                            file_name.as_deref(),
                            content,
                            from_username,
                            &msg_hash,
                        )
                        .await
                    }
                }
            }
        };

        self.dispatcher
            .dispatch(sender, &outcome.into_event(msg_hash))
            .await;
        outcome
    }

    async fn forward_text(
        &self,
        recipient: &PeerRef,
        content: String,
        from_username: String,
        msg_hash: &str,
    ) -> RouteOutcome {
        let event = OutboundEvent::Msg(DeliveredMessage {
            content,
            kind: MessageKind::Msg,
            from_username,
            msg_hash: msg_hash.to_string(),
        });

        match self.dispatcher.dispatch(recipient, &event).await {
            DispatchOutcome::Delivered => RouteOutcome::Sent,
            DispatchOutcome::Failed => RouteOutcome::RecipientOffline,
        }
    }

    async fn forward_file(
        &self,
        recipient: &PeerRef,
        owner: &str,
        file_name: Option<&str>,
        content: String,
        from_username: String,
        msg_hash: &str,
    ) -> RouteOutcome {
        let file_name = match self.upload(owner, file_name, content).await {
            Ok(file_name) => file_name,
            Err(err) => {
                warn!(
                    file = file_name.unwrap_or_default(),
                    error = %err,
                    "Attachment upload failed"
                );
                return RouteOutcome::UploadFailed;
            }
        };
        info!(file = %file_name, "Attachment uploaded");

        let event = OutboundEvent::Msg(DeliveredMessage {
            content: format!("/{}/{}", owner, file_name),
            kind: MessageKind::File,
            from_username,
            msg_hash: msg_hash.to_string(),
        });

        // Confirmation for files rests on the upload, not on the recipient.
        if self.dispatcher.dispatch(recipient, &event).await == DispatchOutcome::Failed {
            warn!(to = %owner, file = %file_name, "Recipient missed file reference");
        }
        RouteOutcome::Sent
    }

    async fn upload<'a>(
        &self,
        owner: &str,
        file_name: Option<&'a str>,
        content: String,
    ) -> Result<&'a str, RelayError> {
        let file_name = file_name.ok_or_else(|| RelayError::invalid_name(""))?;
        validate_name(file_name)?;
        self.blobs.put(owner, file_name, Bytes::from(content)).await?;
        Ok(file_name)
    }
}
