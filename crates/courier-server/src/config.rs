//! Server configuration loaded from `COURIER_*` environment variables.
//!
//! # Environment Variables
//!
//! - `COURIER_BIND_ADDR`: listen address. Default: `0.0.0.0:3000`
//! - `COURIER_ACK_TIMEOUT_MS`: ack deadline for pushed events. Default: `1000`
//! - `COURIER_STORAGE`: attachment backend (`memory`, `local` or `s3`). Default: `memory`
//! - `COURIER_STORAGE_DIR`: root directory for the `local` backend. Default: `./uploads`
//! - `COURIER_S3_BUCKET`: bucket for the `s3` backend (required there)
//! - `COURIER_S3_REGION`: region for the `s3` backend. Default: `eu-north-1`
//!
//! # Examples
//!
//! ```bash
//! COURIER_STORAGE=local COURIER_STORAGE_DIR=/var/lib/courier cargo run
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use courier_relay::RelayConfig;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_STORAGE_DIR: &str = "./uploads";
pub const DEFAULT_S3_REGION: &str = "eu-north-1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Backend holding message attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StorageKind {
    /// Volatile in-process store
    #[default]
    Memory,
    /// Directory on the local filesystem
    Local,
    /// Amazon S3 bucket
    S3,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Memory => write!(f, "memory"),
            StorageKind::Local => write!(f, "local"),
            StorageKind::S3 => write!(f, "s3"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub ack_timeout: Duration,
    pub storage: StorageKind,
    pub storage_dir: PathBuf,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            storage: StorageKind::default(),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            s3_bucket: None,
            s3_region: DEFAULT_S3_REGION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("COURIER_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                var: "COURIER_BIND_ADDR",
                value: bind_addr.clone(),
                reason: e.to_string(),
            })?;

        let ack_timeout = match lookup("COURIER_ACK_TIMEOUT_MS") {
            Some(raw) => {
                let millis = raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                    var: "COURIER_ACK_TIMEOUT_MS",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                if millis == 0 {
                    return Err(ConfigError::Invalid {
                        var: "COURIER_ACK_TIMEOUT_MS",
                        value: raw,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_millis(millis)
            }
            None => Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
        };

        let storage = match lookup("COURIER_STORAGE") {
            Some(raw) => StorageKind::from_str(&raw, true).map_err(|reason| {
                ConfigError::Invalid {
                    var: "COURIER_STORAGE",
                    value: raw.clone(),
                    reason,
                }
            })?,
            None => StorageKind::default(),
        };

        let storage_dir = lookup("COURIER_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));

        let s3_bucket = lookup("COURIER_S3_BUCKET").filter(|bucket| !bucket.is_empty());
        let s3_region =
            lookup("COURIER_S3_REGION").unwrap_or_else(|| DEFAULT_S3_REGION.to_string());

        Ok(Self {
            bind_addr,
            ack_timeout,
            storage,
            storage_dir,
            s3_bucket,
            s3_region,
        })
    }

    /// Relay core settings derived from this configuration.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig::default().with_ack_timeout(self.ack_timeout)
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Bind address: {}", self.bind_addr);
        info!("Ack timeout: {} ms", self.ack_timeout.as_millis());

        match self.storage {
            StorageKind::Memory => info!("Attachment storage: memory (not persisted)"),
            StorageKind::Local => info!(
                "Attachment storage: local ({})",
                self.storage_dir.display()
            ),
            StorageKind::S3 => info!(
                "Attachment storage: s3 (bucket {}, region {})",
                self.s3_bucket.as_deref().unwrap_or("<unset>"),
                self.s3_region
            ),
        }
    }
}
