//! Content-hash deduplication.
//!
//! Pure lookup: two simultaneous uploads of identical content may both
//! observe [`DedupOutcome::New`]; the file commit resolves that race through
//! the store's uniqueness constraint, not here.

use std::sync::Arc;

use depot_core::models::StoredFile;
use depot_core::AppError;
use depot_db::FileStore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lowercase hex SHA-256 over the full byte stream.
pub fn content_fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Result of resolving uploaded content against a tenant's existing files.
#[derive(Debug, Clone)]
pub enum DedupOutcome {
    /// A non-tombstoned file with identical content already exists; the
    /// caller adds an association instead of re-uploading bytes.
    Existing(StoredFile),
    /// No live copy; the caller commits a new file under this hash.
    New { content_hash: String },
}

#[derive(Clone)]
pub struct HashDeduplicator {
    files: Arc<dyn FileStore>,
}

impl HashDeduplicator {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }

    #[tracing::instrument(skip(self, content), fields(tenant_id = %tenant_id, size_bytes = content.len()))]
    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        content: &[u8],
    ) -> Result<DedupOutcome, AppError> {
        let content_hash = content_fingerprint(content);
        match self
            .files
            .find_active_by_hash(tenant_id, &content_hash)
            .await?
        {
            Some(existing) => {
                tracing::debug!(file_id = %existing.id, "Content resolved to existing file");
                Ok(DedupOutcome::Existing(existing))
            }
            None => Ok(DedupOutcome::New { content_hash }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::models::NewFile;
    use depot_db::{InsertOutcome, MemoryFileStore};

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            content_fingerprint(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(content_fingerprint(b"").len(), 64);
    }

    #[tokio::test]
    async fn test_resolve_new_then_existing() {
        let files = Arc::new(MemoryFileStore::new());
        let dedup = HashDeduplicator::new(files.clone());
        let tenant = Uuid::new_v4();
        let content = b"same bytes";

        let DedupOutcome::New { content_hash } = dedup.resolve(tenant, content).await.unwrap()
        else {
            panic!("fresh content must resolve to New");
        };

        let InsertOutcome::Created(file) = files
            .insert(NewFile {
                tenant_id: tenant,
                content_hash: content_hash.clone(),
                size_bytes: content.len() as u64,
                storage_key: format!("files/{}/{}", tenant, content_hash),
                mime_type: "application/octet-stream".to_string(),
                uploader_id: Uuid::new_v4(),
            })
            .await
            .unwrap()
        else {
            panic!("expected creation");
        };

        match dedup.resolve(tenant, content).await.unwrap() {
            DedupOutcome::Existing(existing) => assert_eq!(existing.id, file.id),
            DedupOutcome::New { .. } => panic!("committed content must resolve to Existing"),
        }

        // A different tenant never sees the other tenant's file.
        assert!(matches!(
            dedup.resolve(Uuid::new_v4(), content).await.unwrap(),
            DedupOutcome::New { .. }
        ));
    }
}
