//! Attachment retrieval
//!
//! - GET /:owner/:file - Download an attachment previously relayed to `owner`
//!
//! Attachments are written by the relay while routing `file` messages; this
//! endpoint only reads them back.
//!
//! Responses: 200 with the raw bytes, 404 when nothing is stored under the
//! key, 500 when the store fails. A name that could never have been stored
//! (empty or containing `/` after percent-decoding) gets 400 rather than
//! being reported as a storage failure.

use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use courier_relay::RelayError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Create the files router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/:owner/:file", get(download_handler))
        .with_state(state)
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(ErrorResponse::new(error, message))).into_response()
}

/// GET /:owner/:file
#[instrument(skip(state))]
pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path((owner, file)): Path<(String, String)>,
) -> Response {
    debug!("Download request for {}/{}", owner, file);

    match state.blobs.get(&owner, &file).await {
        Ok(Some(bytes)) => {
            info!("Serving attachment: {}/{} ({} bytes)", owner, file, bytes.len());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                bytes,
            )
                .into_response()
        }
        Ok(None) => {
            warn!("Attachment not found: {}/{}", owner, file);
            error_response(
                StatusCode::NOT_FOUND,
                "file_not_found",
                &format!("File '{}' not found", file),
            )
        }
        Err(RelayError::InvalidAttachmentName(name)) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_name",
            &format!("Invalid name '{}'", name),
        ),
        Err(err) => {
            error!("Failed to read attachment {}/{}: {}", owner, file, err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "Attachment storage unavailable",
            )
        }
    }
}
