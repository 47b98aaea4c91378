//! Blob Store for message attachments.
//!
//! Attachments are stored under the key `owner/file`, where `owner` is the
//! recipient's username. Names are validated before any storage call so a
//! crafted file name can never escape its owner's prefix.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, instrument, warn};

use crate::RelayError;

/// Separator between owner and file in a storage key.
pub const KEY_SEPARATOR: char = '/';

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `owner/file`, replacing any previous object.
    async fn put(&self, owner: &str, file: &str, bytes: Bytes) -> Result<(), RelayError>;

    /// Fetch `owner/file`. `Ok(None)` when nothing was ever stored there.
    async fn get(&self, owner: &str, file: &str) -> Result<Option<Bytes>, RelayError>;
}

/// Reject empty names and names containing the key separator.
pub fn validate_name(name: &str) -> Result<(), RelayError> {
    if name.is_empty() || name.contains(KEY_SEPARATOR) {
        warn!(name = %name, "Name cannot be empty or contain '/'");
        return Err(RelayError::invalid_name(name));
    }
    Ok(())
}

/// Validated storage key for `owner/file`.
pub fn object_key(owner: &str, file: &str) -> Result<Path, RelayError> {
    validate_name(owner)?;
    validate_name(file)?;
    Ok(Path::from_iter([owner, file]))
}

/// [`BlobStore`] over any `object_store` backend (S3, local filesystem, memory).
#[derive(Clone)]
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Volatile store for development and tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, owner: &str, file: &str, bytes: Bytes) -> Result<(), RelayError> {
        let key = object_key(owner, file)?;
        self.store
            .put(&key, PutPayload::from(bytes))
            .await
            .map_err(|source| RelayError::UploadFailure {
                key: key.to_string(),
                source,
            })?;
        debug!(key = %key, "Stored attachment");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, owner: &str, file: &str) -> Result<Option<Bytes>, RelayError> {
        let key = object_key(owner, file)?;
        let result = match self.store.get(&key).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(source) => {
                return Err(RelayError::StorageUnavailable {
                    key: key.to_string(),
                    source,
                })
            }
        };

        let bytes = result
            .bytes()
            .await
            .map_err(|source| RelayError::StorageUnavailable {
                key: key.to_string(),
                source,
            })?;
        Ok(Some(bytes))
    }
}

impl fmt::Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBlobStore")
            .field("store", &self.store.to_string())
            .finish()
    }
}
