//! Logging setup for Courier Server.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and an fmt
//! layer. `RUST_LOG` overrides the default filter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,courier_server=debug,courier_relay=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize structured console logging.
///
/// # Example
///
/// ```ignore
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     telemetry::init().map_err(|e| anyhow::anyhow!(e))?;
///
///     // Your application code here...
///
///     telemetry::shutdown();
///     Ok(())
/// }
/// ```
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Telemetry initialized");

    Ok(())
}

/// Initialize telemetry for local development, with multi-line colored output.
pub fn init_local() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Local telemetry initialized");

    Ok(())
}

pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
