//! Blob store abstraction trait
//!
//! This module defines the BlobStore trait that all blob backends must
//! implement. The engine treats the blob store as an external system with
//! put/get/sign/delete semantics and nothing else.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Blob store operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether a bounded retry may help. Absent blobs and bad keys never
    /// become valid by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::UploadFailed(_)
                | StorageError::DownloadFailed(_)
                | StorageError::DeleteFailed(_)
                | StorageError::BackendError(_)
                | StorageError::IoError(_)
        )
    }
}

/// Result type for blob store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Byte stream yielded by [`BlobStore::get_stream`].
pub type BlobByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Blob store abstraction trait
///
/// All backends (S3-compatible, local filesystem, in-memory) must implement
/// this trait so the engine never couples to a concrete provider.
///
/// **Key format:** keys are content-addressed and tenant-scoped:
/// `files/{tenant_id}/{content_hash}`. See [`crate::keys`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob under the given key and return its public URL.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<String>;

    /// Read a blob into memory.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Read a blob as a stream of chunks (for large downloads).
    async fn get_stream(&self, key: &str) -> StorageResult<BlobByteStream>;

    /// Generate a presigned/temporary URL for direct GET access.
    async fn sign(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Delete a blob. Deleting an absent blob is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check if a blob exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get the size in bytes of a blob, if it exists.
    async fn content_length(&self, key: &str) -> StorageResult<u64>;

    /// Get the backend type.
    fn backend_type(&self) -> StorageBackend;
}
