//! In-memory blob store.
//!
//! Used by engine tests and embedded runs; no persistence, no presigning
//! infrastructure. Supports injecting put failures so callers can exercise
//! the blob-write failure path.

use crate::traits::{BlobByteStream, BlobStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Blob store that keeps everything in a map.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_puts: Arc<AtomicBool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail with a transient error.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Check if a blob exists (for test assertions).
    pub fn has_blob(&self, key: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }

    /// Get blob data (for test assertions).
    pub fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(key).cloned()
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<String> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed(
                "injected put failure".to_string(),
            ));
        }
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(format!("memory://{}", key))
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<BlobByteStream> {
        let data = self.get(key).await?;
        let byte_stream = stream::once(async move { Ok(Bytes::from(data)) });
        Ok(Box::pin(byte_stream))
    }

    async fn sign(&self, key: &str, _expires_in: Duration) -> StorageResult<String> {
        if !self.has_blob(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(format!("memory://signed/{}", key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.has_blob(key))
    }

    async fn content_length(&self, key: &str) -> StorageResult<u64> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .map(|d| d.len() as u64)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let store = MemoryBlobStore::new();
        let url = store
            .put("files/t/abc", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        assert_eq!(url, "memory://files/t/abc");
        assert_eq!(store.get("files/t/abc").await.unwrap(), b"hello");
        assert_eq!(store.content_length("files/t/abc").await.unwrap(), 5);

        store.delete("files/t/abc").await.unwrap();
        assert!(!store.has_blob("files/t/abc"));
    }

    #[tokio::test]
    async fn test_injected_put_failure() {
        let store = MemoryBlobStore::new();
        store.set_fail_puts(true);
        let err = store
            .put("files/t/abc", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(_)));
        assert_eq!(store.blob_count(), 0);
    }
}
