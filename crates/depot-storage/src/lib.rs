//! Depot blob store abstraction and backends.
//!
//! The engine treats the blob store as an external system with
//! put/get/sign/delete semantics. Backends: S3-compatible object storage
//! (`storage-s3` feature), local filesystem (`storage-local` feature), and
//! an always-available in-memory store for tests and embedded runs.

pub mod keys;
pub mod memory;
pub mod retry;
pub mod traits;

#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;

use serde::{Deserialize, Serialize};

/// Blob store backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
    Memory,
}

pub use keys::content_key;
pub use memory::MemoryBlobStore;
pub use retry::with_retries;
pub use traits::{BlobByteStream, BlobStore, StorageError, StorageResult};

#[cfg(feature = "storage-local")]
pub use local::LocalBlobStore;
#[cfg(feature = "storage-s3")]
pub use s3::S3BlobStore;
