//! File repository: committed file rows and their sharing associations.

use chrono::{DateTime, Utc};
use depot_core::models::{AccessScope, FileAssociation, NewFile, StoredFile};
use depot_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::traits::{FileStore, InsertOutcome};
use async_trait::async_trait;

/// Row type for the files table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    tenant_id: Uuid,
    content_hash: String,
    size_bytes: i64,
    storage_key: String,
    mime_type: String,
    uploader_id: Uuid,
    created_at: DateTime<Utc>,
    tombstoned_at: Option<DateTime<Utc>>,
}

impl FileRow {
    fn into_stored_file(self) -> StoredFile {
        StoredFile {
            id: self.id,
            tenant_id: self.tenant_id,
            content_hash: self.content_hash,
            size_bytes: self.size_bytes as u64,
            storage_key: self.storage_key,
            mime_type: self.mime_type,
            uploader_id: self.uploader_id,
            created_at: self.created_at,
            tombstoned_at: self.tombstoned_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AssociationRow {
    id: Uuid,
    file_id: Uuid,
    context_id: Uuid,
    shared_by: Uuid,
    scope: AccessScope,
    created_at: DateTime<Utc>,
}

impl AssociationRow {
    fn into_association(self) -> FileAssociation {
        FileAssociation {
            id: self.id,
            file_id: self.file_id,
            context_id: self.context_id,
            shared_by: self.shared_by,
            scope: self.scope,
            created_at: self.created_at,
        }
    }
}

const FILE_COLUMNS: &str =
    "id, tenant_id, content_hash, size_bytes, storage_key, mime_type, uploader_id, created_at, tombstoned_at";

/// Repository for the files and file_associations tables.
#[derive(Clone)]
pub struct PgFileStore {
    pool: PgPool,
}

impl PgFileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileStore for PgFileStore {
    /// Insert a file row, resolving the unique-content race through the
    /// partial unique index on `(tenant_id, content_hash) WHERE
    /// tombstoned_at IS NULL`.
    #[tracing::instrument(skip(self, file), fields(db.table = "files", tenant_id = %file.tenant_id))]
    async fn insert(&self, file: NewFile) -> Result<InsertOutcome, AppError> {
        let inserted: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(&format!(
            r#"
            INSERT INTO files (id, tenant_id, content_hash, size_bytes, storage_key, mime_type, uploader_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, content_hash) WHERE tombstoned_at IS NULL DO NOTHING
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(file.tenant_id)
        .bind(&file.content_hash)
        .bind(file.size_bytes as i64)
        .bind(&file.storage_key)
        .bind(&file.mime_type)
        .bind(file.uploader_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Created(row.into_stored_file()));
        }

        // A concurrent writer won the insert; surface its row instead.
        let existing = self
            .find_active_by_hash(file.tenant_id, &file.content_hash)
            .await?
            .ok_or_else(|| {
                AppError::Internal(
                    "file insert conflicted but no active row is visible".to_string(),
                )
            })?;
        Ok(InsertOutcome::Duplicate(existing))
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.record_id = %id))]
    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<StoredFile>, AppError> {
        let row: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FileRow::into_stored_file))
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.record_id = %id))]
    async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredFile>, AppError> {
        let row: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FileRow::into_stored_file))
    }

    #[tracing::instrument(skip(self, content_hash), fields(db.table = "files", tenant_id = %tenant_id))]
    async fn find_active_by_hash(
        &self,
        tenant_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<StoredFile>, AppError> {
        let row: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM files
            WHERE tenant_id = $1 AND content_hash = $2 AND tombstoned_at IS NULL
            "#
        ))
        .bind(tenant_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FileRow::into_stored_file))
    }

    /// Conditional on the row not being tombstoned yet, so concurrent
    /// deleters release quota exactly once.
    #[tracing::instrument(skip(self), fields(db.table = "files", db.record_id = %id))]
    async fn tombstone(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredFile>, AppError> {
        let row: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(&format!(
            r#"
            UPDATE files SET tombstoned_at = $3
            WHERE tenant_id = $1 AND id = $2 AND tombstoned_at IS NULL
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FileRow::into_stored_file))
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", tenant_id = %tenant_id))]
    async fn active_totals(&self, tenant_id: Uuid) -> Result<(u64, u64), AppError> {
        let (bytes, count): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(size_bytes), 0)::BIGINT, COUNT(*)
            FROM files
            WHERE tenant_id = $1 AND tombstoned_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((bytes as u64, count as u64))
    }

    #[tracing::instrument(skip(self), fields(db.table = "file_associations", file_id = %file_id))]
    async fn create_association(
        &self,
        file_id: Uuid,
        context_id: Uuid,
        shared_by: Uuid,
        scope: AccessScope,
    ) -> Result<FileAssociation, AppError> {
        let row: AssociationRow = sqlx::query_as::<Postgres, AssociationRow>(
            r#"
            INSERT INTO file_associations (id, file_id, context_id, shared_by, scope)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, file_id, context_id, shared_by, scope, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(file_id)
        .bind(context_id)
        .bind(shared_by)
        .bind(scope)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_association())
    }

    #[tracing::instrument(skip(self), fields(db.table = "file_associations", file_id = %file_id))]
    async fn associations_for_file(
        &self,
        file_id: Uuid,
    ) -> Result<Vec<FileAssociation>, AppError> {
        let rows: Vec<AssociationRow> = sqlx::query_as::<Postgres, AssociationRow>(
            r#"
            SELECT id, file_id, context_id, shared_by, scope, created_at
            FROM file_associations
            WHERE file_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AssociationRow::into_association).collect())
    }

    /// A tombstoned row's blob is only purgeable while no active row shares
    /// its storage key (the same content may have been re-uploaded).
    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn purgeable_tombstones(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredFile>, AppError> {
        let rows: Vec<FileRow> = sqlx::query_as::<Postgres, FileRow>(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM files f
            WHERE f.tombstoned_at < $1
              AND f.blob_purged_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM files a
                  WHERE a.storage_key = f.storage_key AND a.tombstoned_at IS NULL
              )
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FileRow::into_stored_file).collect())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.record_id = %id))]
    async fn mark_blob_purged(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE files SET blob_purged_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
