//! Blob Storage
//!
//! Key-addressed binary storage for firmware images.
//!
//! Components:
//! - `local` - Filesystem-backed store rooted at a directory
//! - `s3` - S3-compatible object storage

pub mod local;
pub mod s3;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

use crate::engine::config::{StorageConfig, StorageKind};

pub use local::LocalBlobStore;
pub use s3::S3BlobStore;

/// Readable body of a blob
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Keys produced by `list`
pub type KeyStream = BoxStream<'static, Result<String, StorageError>>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),
    #[error("Invalid blob key: {0}")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Object storage error: {0}")]
    Backend(String),
    #[error("Storage misconfigured: {0}")]
    Config(String),
}

/// Capability contract shared by every storage backend.
///
/// `upload` must drain the whole stream and only expose the object once it
/// is fully written; callers treat any error as "not stored".
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` under `key`, replacing any previous object, and return a locator
    async fn upload(&self, key: &str, data: ByteStream, content_type: &str) -> Result<String, StorageError>;

    async fn download(&self, key: &str) -> Result<ByteStream, StorageError>;

    /// Remove the object under `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`; every call starts a fresh listing
    fn list(&self, prefix: &str) -> KeyStream;

    /// Public URL when a base address is configured, else a placeholder locator
    fn resolve_url(&self, key: &str) -> String;

    /// Time-bounded signed GET URL, for backends that support one
    async fn signed_url(&self, _key: &str, _expires_in: Duration) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Backend name for logs
    fn kind(&self) -> &'static str;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn upload(&self, key: &str, data: ByteStream, content_type: &str) -> Result<String, StorageError> {
        (**self).upload(key, data, content_type).await
    }

    async fn download(&self, key: &str) -> Result<ByteStream, StorageError> {
        (**self).download(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        (**self).delete(key).await
    }

    fn list(&self, prefix: &str) -> KeyStream {
        (**self).list(prefix)
    }

    fn resolve_url(&self, key: &str) -> String {
        (**self).resolve_url(key)
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<Option<String>, StorageError> {
        (**self).signed_url(key, expires_in).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        (**self).close().await
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }
}

/// Wrap an in-memory buffer as a single-chunk stream
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    stream::once(futures_util::future::ready(Ok(data.into()))).boxed()
}

/// Join `base` and `key` with exactly one slash
pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Backend chosen by `open_store` for a configuration
pub fn select_kind(config: &StorageConfig) -> StorageKind {
    match config.kind {
        Some(kind) => kind,
        None if config.s3.has_credentials() => StorageKind::S3,
        None => StorageKind::Local,
    }
}

/// Open the configured backend.
///
/// An explicit `kind` wins; otherwise S3 is used when credentials are present.
/// An explicit S3 backend without static credentials uses the AWS provider chain.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    let kind = select_kind(config);
    tracing::info!(backend = ?kind, "opening blob storage");

    match kind {
        StorageKind::Local => {
            let store = LocalBlobStore::open(&config.local_path, config.public_base_url.clone()).await?;
            Ok(Arc::new(store))
        }
        StorageKind::S3 => {
            let store = S3BlobStore::connect(&config.s3, config.public_base_url.clone()).await?;
            Ok(Arc::new(store))
        }
    }
}
