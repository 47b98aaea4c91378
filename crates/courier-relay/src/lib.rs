//! # courier-relay
//!
//! Real-time message relay core for Courier.
//!
//! This crate routes messages between named clients, tracks who is online,
//! and coordinates attachment uploads through a blob store. It knows nothing
//! about sockets: a transport feeds decoded [`ClientFrame`]s into a
//! [`Session`] and writes out the [`ServerFrame`]s it produces.
//!
//! ## Architecture
//!
//! - **Presence Registry**: username ↔ connection index, the only shared mutable state
//! - **Dispatcher**: push an event and wait a bounded time for the peer's ack;
//!   peers that fail are evicted
//! - **Message Router**: login / msg / disconnect state machine
//! - **Blob Store**: `owner/file` attachment storage over `object_store`
//! - **Session**: per-connection driver serializing one client's requests

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
pub mod storage;

mod error;

pub use config::RelayConfig;
pub use connection::{ConnId, ConnectionHandle, Peer, PeerRef};
pub use dispatcher::{DispatchOutcome, Dispatcher, DEFAULT_ACK_TIMEOUT};
pub use error::RelayError;
pub use protocol::{
    ClientFrame, DeliveredMessage, InboundEvent, LoginRequest, MessageKind, MsgRequest,
    OutboundEvent, Receipt, ServerFrame,
};
pub use registry::PresenceRegistry;
pub use router::{MessageRouter, RouteOutcome, ANONYMOUS_SENDER};
pub use session::Session;
pub use storage::{BlobStore, ObjectBlobStore};
