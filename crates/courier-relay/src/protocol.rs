//! Wire protocol for the real-time relay.
//!
//! Frames are JSON objects exchanged over a text transport:
//!
//! ```text
//! client -> server   {"event": "msg", "data": {...}, "id": 4}     request, wants a reply
//! server -> client   {"ack": 4, "data": true}                     reply to request 4
//! server -> client   {"event": "msg_sent", "data": {...}, "id": 9} push, wants an ack
//! client -> server   {"ack": 9}                                   ack of push 9
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RelayError;

pub const EVENT_LOGIN: &str = "login";
pub const EVENT_MSG: &str = "msg";
pub const EVENT_MSG_SENT: &str = "msg_sent";
pub const EVENT_OFFLINE_RECIPIENT: &str = "offline_recipient";
pub const EVENT_FILE_UPLOAD_FAIL: &str = "file_upload_fail";

/// Frame received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// Acknowledgment of a server-pushed event.
    Ack { ack: u64 },
    /// Request; a reply is sent only when `id` is present.
    Event {
        event: String,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
}

/// Frame sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Reply to the client request carrying the same id.
    Ack { ack: u64, data: Value },
    /// Server-pushed event. The client must answer `{"ack": id}`.
    Event {
        event: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
}

impl ServerFrame {
    /// Event name, if this is a pushed event.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            ServerFrame::Event { event, .. } => Some(event),
            ServerFrame::Ack { .. } => None,
        }
    }
}

/// Message kind carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Msg,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub user_name: String,
}

/// An inbound `msg` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRequest {
    /// Client-chosen correlation token echoed in the terminal event
    pub msg_hash: String,
    pub to_username: String,
    /// Text body, or the raw attachment body for `file`
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Required for `file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Payload of the `msg` event pushed to a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub from_username: String,
    pub msg_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub msg_hash: String,
}

impl Receipt {
    pub fn new(msg_hash: impl Into<String>) -> Self {
        Self {
            msg_hash: msg_hash.into(),
        }
    }
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Login(LoginRequest),
    Msg(MsgRequest),
}

impl InboundEvent {
    /// Parse and validate a request by event name.
    pub fn parse(event: &str, data: Value) -> Result<Self, RelayError> {
        match event {
            EVENT_LOGIN => Ok(Self::Login(serde_json::from_value(data)?)),
            EVENT_MSG => Ok(Self::Msg(serde_json::from_value(data)?)),
            other => Err(RelayError::UnknownEvent(other.to_string())),
        }
    }
}

/// An event pushed from the relay to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    Msg(DeliveredMessage),
    MsgSent(Receipt),
    OfflineRecipient(Receipt),
    FileUploadFail(Receipt),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Msg(_) => EVENT_MSG,
            OutboundEvent::MsgSent(_) => EVENT_MSG_SENT,
            OutboundEvent::OfflineRecipient(_) => EVENT_OFFLINE_RECIPIENT,
            OutboundEvent::FileUploadFail(_) => EVENT_FILE_UPLOAD_FAIL,
        }
    }

    pub fn data(&self) -> Result<Value, RelayError> {
        let value = match self {
            OutboundEvent::Msg(message) => serde_json::to_value(message)?,
            OutboundEvent::MsgSent(receipt)
            | OutboundEvent::OfflineRecipient(receipt)
            | OutboundEvent::FileUploadFail(receipt) => serde_json::to_value(receipt)?,
        };
        Ok(value)
    }

    /// Build the frame for this event, expecting an ack under `id`.
    pub fn to_frame(&self, id: u64) -> Result<ServerFrame, RelayError> {
        Ok(ServerFrame::Event {
            event: self.name().to_string(),
            data: self.data()?,
            id: Some(id),
        })
    }
}
