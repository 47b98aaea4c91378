use anyhow::Result;
use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use courier_relay::{BlobStore, MessageRouter};
use serde_json::json;
use std::{future::Future, net::SocketAddr, sync::Arc};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

mod routes;

/// Server application state
pub struct AppState {
    /// Relay core shared by every WebSocket session
    pub router: Arc<MessageRouter>,
    /// Attachment store served by the retrieval endpoint
    pub blobs: Arc<dyn BlobStore>,
}

impl AppState {
    pub fn new(router: Arc<MessageRouter>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { router, blobs }
    }
}

/// Start the HTTP server, running until `shutdown` resolves.
pub async fn start<F>(state: AppState, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(Arc::new(state));

    info!("Starting Axum HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Create the Axum router with all routes and middleware
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .merge(routes::websocket::router(state.clone()))
        .merge(routes::files::router(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

/// Simple health check endpoint (for load balancers)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "courier-server",
        "version": env!("CARGO_PKG_VERSION"),
        "online_users": state.router.registry().len(),
    }))
}
