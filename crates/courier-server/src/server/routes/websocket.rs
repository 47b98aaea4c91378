//! Relay protocol over WebSocket
//!
//! Each text frame carries one JSON object: a request (`{"event", "data", "id"}`)
//! or an ack of a pushed event (`{"ack"}`). Frames are handed to a relay
//! [`Session`]; everything the session emits is written back as text frames.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use courier_relay::{ClientFrame, ServerFrame, Session};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::server::AppState;

/// Pongs and other control frames waiting for the writer.
const CONTROL_BUFFER: usize = 8;

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

/// GET /ws
///
/// Upgrades the HTTP connection to a WebSocket carrying the relay protocol.
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("WebSocket connection request");
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle one relay connection until the client goes away
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();

    let (frames_tx, frames_rx) = mpsc::channel(state.router.config().outbound_buffer);
    let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);

    let session = Session::start(state.router.clone(), frames_tx);
    let conn = session.id();
    info!(conn = %conn, "WebSocket connection established");

    let writer = tokio::spawn(write_frames(sender, frames_rx, control_rx));

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => {
                    if let Err(e) = session.handle_frame(frame).await {
                        warn!(conn = %conn, error = %e, "Session stopped accepting frames");
                        break;
                    }
                }
                Err(e) => {
                    warn!(conn = %conn, error = %e, "Ignoring malformed frame");
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(conn = %conn, "Received binary WebSocket message (not supported)");
            }
            Ok(Message::Ping(data)) => {
                if control_tx.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(conn = %conn, "WebSocket close requested");
                break;
            }
            Err(e) => {
                warn!(conn = %conn, error = %e, "WebSocket error");
                break;
            }
        }
    }

    drop(control_tx);
    let username = session.finish().await;
    if let Err(e) = writer.await {
        error!(conn = %conn, error = %e, "WebSocket writer failed");
    }

    info!(
        conn = %conn,
        username = username.as_deref().unwrap_or("-"),
        "WebSocket connection closed"
    );
}

/// Serialize session output onto the socket.
async fn write_frames(
    mut sender: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<ServerFrame>,
    mut control: mpsc::Receiver<Message>,
) {
    loop {
        let msg = tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => match serde_json::to_string(&frame) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        error!(error = %e, "Failed to encode frame");
                        continue;
                    }
                },
                None => break,
            },
            control = control.recv() => match control {
                Some(msg) => msg,
                None => break,
            },
        };

        if let Err(e) = sender.send(msg).await {
            debug!(error = %e, "Failed to send WebSocket message");
            break;
        }
    }

    let _ = sender.close().await;
}
