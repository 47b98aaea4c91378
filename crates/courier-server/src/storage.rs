//! Attachment backend selection.

use std::sync::Arc;

use anyhow::{Context, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tracing::info;

use crate::config::{ConfigError, ServerConfig, StorageKind};

/// Build the `object_store` backend named by the configuration.
///
/// S3 credentials come from the standard AWS environment variables.
pub fn build_object_store(config: &ServerConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.storage {
        StorageKind::Memory => Ok(Arc::new(InMemory::new())),
        StorageKind::Local => {
            std::fs::create_dir_all(&config.storage_dir).with_context(|| {
                format!(
                    "failed to create storage directory {}",
                    config.storage_dir.display()
                )
            })?;
            let store = LocalFileSystem::new_with_prefix(&config.storage_dir)
                .context("failed to open local attachment storage")?;
            info!(root = %config.storage_dir.display(), "Local attachment storage ready");
            Ok(Arc::new(store))
        }
        StorageKind::S3 => {
            let bucket = config
                .s3_bucket
                .as_deref()
                .ok_or(ConfigError::Missing("COURIER_S3_BUCKET"))?;
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(&config.s3_region)
                .build()
                .context("failed to configure S3 attachment storage")?;
            info!(bucket = %bucket, region = %config.s3_region, "S3 attachment storage ready");
            Ok(Arc::new(store))
        }
    }
}
