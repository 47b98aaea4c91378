//! Error types for the relay core.

use std::time::Duration;

use thiserror::Error;

/// Relay errors.
///
/// Routing-level failures never escape the router: they are translated into a
/// sender-visible notification. Only the retrieval endpoint reports them to its
/// caller directly.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Recipient has no presence entry, or delivery to it failed
    #[error("Recipient offline: {0}")]
    RecipientOffline(String),

    /// Peer did not acknowledge an event before the deadline
    #[error("No acknowledgment within {0:?}")]
    AckTimeout(Duration),

    /// The underlying connection is gone
    #[error("Connection closed")]
    ConnectionClosed,

    /// Attachment or owner name is empty or contains a path separator
    #[error("Invalid attachment name: {0:?}")]
    InvalidAttachmentName(String),

    /// The blob store rejected or failed a write
    #[error("Upload of {key} failed: {source}")]
    UploadFailure {
        key: String,
        #[source]
        source: object_store::Error,
    },

    /// The blob store could not be reached for a read
    #[error("Storage unavailable for {key}: {source}")]
    StorageUnavailable {
        key: String,
        #[source]
        source: object_store::Error,
    },

    /// Object was never stored
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Client sent an event name the relay does not handle
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Client payload failed validation
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl RelayError {
    /// Create a new recipient offline error.
    pub fn recipient_offline(username: impl Into<String>) -> Self {
        Self::RecipientOffline(username.into())
    }

    /// Create a new invalid attachment name error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidAttachmentName(name.into())
    }

    /// Whether this error means the peer should be treated as dead.
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(self, Self::AckTimeout(_) | Self::ConnectionClosed)
    }
}
