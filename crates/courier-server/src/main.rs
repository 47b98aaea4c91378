use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use courier_relay::{BlobStore, MessageRouter, ObjectBlobStore};
use tracing::{info, warn};

mod config;
mod server;
mod storage;
mod telemetry;

use config::{ServerConfig, StorageKind};
use server::AppState;

/// Courier relay server
#[derive(Debug, Parser)]
#[command(name = "courier-server", version, about)]
struct Cli {
    /// Listen address, overriding COURIER_BIND_ADDR
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Attachment backend, overriding COURIER_STORAGE
    #[arg(long, value_enum)]
    storage: Option<StorageKind>,

    /// Multi-line colored log output for local development
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.pretty {
        telemetry::init_local()
    } else {
        telemetry::init()
    }
    .map_err(|e| anyhow::anyhow!(e))?;

    info!("Courier Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::from_env().context("invalid configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }
    config.log_config();

    let store = storage::build_object_store(&config)?;
    let blobs: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::new(store));
    let router = Arc::new(MessageRouter::new(&config.relay_config(), blobs.clone()));

    server::start(
        AppState::new(router, blobs),
        config.bind_addr,
        shutdown_signal(),
    )
    .await?;

    telemetry::shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
