//! Artifact storage.
//!
//! A single [`StorageBackend`] contract with two implementations: local
//! filesystem and S3-compatible object store. Selection is configuration
//! (object-store credentials present means object store) and consumers
//! never branch on the backend type. All persisted paths are storage keys,
//! resolved to URLs via `presign` at response time.

pub mod cache;
pub mod local;
pub mod object;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::{Error, Result};

pub use local::LocalStore;
pub use object::ObjectStore;

/// Storage contract shared by both backends.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write `bytes` under `key`, returning the storage handle (the key).
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Read the object at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// A time-limited URL granting read access to `key`.
    ///
    /// The local backend returns a serving-layer path; the object backend
    /// returns a V4 query-signed URL.
    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Build the backend selected by configuration.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when object-store settings are
/// incomplete in a way `object_store_configured` did not catch.
pub fn backend_from_config(config: &StoreConfig) -> Result<Arc<dyn StorageBackend>> {
    if config.object_store_configured() {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| Error::InvalidInput("bucket missing".into()))?;
        let access_key = config
            .access_key_id
            .clone()
            .ok_or_else(|| Error::InvalidInput("access key missing".into()))?;
        let secret_key = config
            .secret_access_key
            .clone()
            .ok_or_else(|| Error::InvalidInput("secret key missing".into()))?;
        tracing::info!(bucket = %bucket, "using object-store backend");
        Ok(Arc::new(ObjectStore::new(
            bucket,
            config.region.clone(),
            access_key,
            secret_key,
            config.endpoint_url.clone(),
        )?))
    } else {
        tracing::info!(root = %config.root.display(), "using local storage backend");
        Ok(Arc::new(LocalStore::new(config.root.clone())))
    }
}

/// Reject keys that could escape the store root.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part == ".." || part.is_empty())
    {
        return Err(Error::StorageFailed(format!("invalid storage key: {key}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("podcasts/audio/a.wav").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a//b").is_err());
    }

    #[test]
    fn local_backend_selected_without_credentials() {
        let config = StoreConfig::default();
        assert!(backend_from_config(&config).is_ok());
    }
}
