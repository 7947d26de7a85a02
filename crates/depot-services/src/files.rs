//! File lifecycle beyond the upload pipeline: sharing associations and
//! soft deletion.

use std::sync::Arc;

use chrono::Utc;
use depot_core::models::{AccessScope, FileAssociation, StoredFile};
use depot_core::AppError;
use depot_db::FileStore;
use uuid::Uuid;

use crate::quota::QuotaService;

#[derive(Clone)]
pub struct FileService {
    files: Arc<dyn FileStore>,
    quota: QuotaService,
}

impl FileService {
    pub fn new(files: Arc<dyn FileStore>, quota: QuotaService) -> Self {
        Self { files, quota }
    }

    pub async fn get(&self, tenant_id: Uuid, file_id: Uuid) -> Result<StoredFile, AppError> {
        self.files
            .get(tenant_id, file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file {} not found", file_id)))
    }

    /// Share an existing file into a context. This is the dedup surface:
    /// a duplicate upload only adds one of these.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id, file_id = %file_id))]
    pub async fn share(
        &self,
        tenant_id: Uuid,
        file_id: Uuid,
        context_id: Uuid,
        shared_by: Uuid,
        scope: AccessScope,
    ) -> Result<FileAssociation, AppError> {
        let file = self.get(tenant_id, file_id).await?;
        if file.is_tombstoned() {
            return Err(AppError::NotFound(format!("file {} not found", file_id)));
        }
        self.files
            .create_association(file.id, context_id, shared_by, scope)
            .await
    }

    pub async fn associations(&self, file_id: Uuid) -> Result<Vec<FileAssociation>, AppError> {
        self.files.associations_for_file(file_id).await
    }

    /// Soft-delete a file and release its quota exactly once.
    ///
    /// The row stays (associations and issued tokens remain resolvable for
    /// audit); the quota release piggybacks on the tombstone transition so
    /// concurrent deleters cannot double-release.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id, file_id = %file_id))]
    pub async fn tombstone(&self, tenant_id: Uuid, file_id: Uuid) -> Result<StoredFile, AppError> {
        let existing = self.get(tenant_id, file_id).await?;
        if existing.is_tombstoned() {
            return Ok(existing);
        }

        match self.files.tombstone(tenant_id, file_id, Utc::now()).await? {
            Some(file) => {
                self.quota.release(tenant_id, file.size_bytes).await?;
                tracing::info!(
                    tenant_id = %tenant_id,
                    file_id = %file_id,
                    size_bytes = file.size_bytes,
                    "File tombstoned"
                );
                Ok(file)
            }
            // A concurrent deleter performed the transition; it also
            // released the quota.
            None => self.get(tenant_id, file_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::models::NewFile;
    use depot_db::{InsertOutcome, MemoryFileStore, MemoryQuotaStore};

    fn services() -> (Arc<MemoryFileStore>, QuotaService, FileService) {
        let files = Arc::new(MemoryFileStore::new());
        let quota = QuotaService::new(
            Arc::new(MemoryQuotaStore::new()),
            files.clone(),
            1024 * 1024,
        );
        let file_service = FileService::new(files.clone(), quota.clone());
        (files, quota, file_service)
    }

    async fn commit_file(
        files: &MemoryFileStore,
        quota: &QuotaService,
        tenant: Uuid,
        hash: &str,
        size: u64,
    ) -> StoredFile {
        let InsertOutcome::Created(file) = files
            .insert(NewFile {
                tenant_id: tenant,
                content_hash: hash.to_string(),
                size_bytes: size,
                storage_key: format!("files/{tenant}/{hash}"),
                mime_type: "text/plain".to_string(),
                uploader_id: Uuid::new_v4(),
            })
            .await
            .unwrap()
        else {
            panic!("expected creation");
        };
        quota.commit(tenant, size).await.unwrap();
        file
    }

    #[tokio::test]
    async fn test_tombstone_releases_quota_once() {
        let (files, quota, service) = services();
        let tenant = Uuid::new_v4();
        let file = commit_file(&files, &quota, tenant, "aa", 300).await;

        let tombstoned = service.tombstone(tenant, file.id).await.unwrap();
        assert!(tombstoned.is_tombstoned());
        assert_eq!(quota.get_usage(tenant).await.unwrap().used_bytes, 0);

        // Tombstoning again keeps the counters at zero.
        service.tombstone(tenant, file.id).await.unwrap();
        let usage = quota.get_usage(tenant).await.unwrap();
        assert_eq!(usage.used_bytes, 0);
        assert_eq!(usage.file_count, 0);
    }

    #[tokio::test]
    async fn test_share_rejects_tombstoned_and_foreign_files() {
        let (files, quota, service) = services();
        let tenant = Uuid::new_v4();
        let file = commit_file(&files, &quota, tenant, "bb", 10).await;

        let association = service
            .share(
                tenant,
                file.id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                AccessScope::Room,
            )
            .await
            .unwrap();
        assert_eq!(association.file_id, file.id);

        // Another tenant cannot share this file.
        let err = service
            .share(
                Uuid::new_v4(),
                file.id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                AccessScope::Room,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        service.tombstone(tenant, file.id).await.unwrap();
        let err = service
            .share(
                tenant,
                file.id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                AccessScope::Room,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
