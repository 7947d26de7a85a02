//! Upload session repository: session rows plus per-file progress rows.
//!
//! Progress transitions are guarded on the prior status so terminal states
//! are final; aggregate recomputation locks the session row, making the
//! session a single-writer-at-a-time aggregate while progress rows stay
//! independently writable by their uploaders.

use chrono::{DateTime, Utc};
use depot_core::models::{
    evaluate_session_status, ProgressStatus, SessionStatus, UploadProgress, UploadSession,
};
use depot_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::traits::{ChunkProgressUpdate, SessionStore};
use async_trait::async_trait;

/// Row type for the upload_sessions table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    tenant_id: Uuid,
    owner_id: Uuid,
    total_files: i32,
    completed_files: i32,
    failed_files: i32,
    total_size_bytes: i64,
    uploaded_size_bytes: i64,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_session(self) -> UploadSession {
        UploadSession {
            id: self.id,
            tenant_id: self.tenant_id,
            owner_id: self.owner_id,
            total_files: self.total_files.max(0) as u32,
            completed_files: self.completed_files.max(0) as u32,
            failed_files: self.failed_files.max(0) as u32,
            total_size_bytes: self.total_size_bytes.max(0) as u64,
            uploaded_size_bytes: self.uploaded_size_bytes.max(0) as u64,
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Row type for the upload_progress table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
struct ProgressRow {
    id: Uuid,
    session_id: Uuid,
    file_id: Option<Uuid>,
    file_name: String,
    mime_type: String,
    status: ProgressStatus,
    bytes_uploaded: i64,
    total_bytes: i64,
    chunk_index: i32,
    total_chunks: i32,
    upload_speed_bps: Option<i64>,
    eta_seconds: Option<i64>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl ProgressRow {
    fn into_progress(self) -> UploadProgress {
        UploadProgress {
            id: self.id,
            session_id: self.session_id,
            file_id: self.file_id,
            file_name: self.file_name,
            mime_type: self.mime_type,
            status: self.status,
            bytes_uploaded: self.bytes_uploaded.max(0) as u64,
            total_bytes: self.total_bytes.max(0) as u64,
            chunk_index: self.chunk_index.max(0) as u32,
            total_chunks: self.total_chunks.max(0) as u32,
            upload_speed_bps: self.upload_speed_bps.map(|v| v.max(0) as u64),
            eta_seconds: self.eta_seconds.map(|v| v.max(0) as u64),
            error_message: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
        }
    }
}

const SESSION_COLUMNS: &str = "id, tenant_id, owner_id, total_files, completed_files, \
     failed_files, total_size_bytes, uploaded_size_bytes, status, created_at, completed_at";

const PROGRESS_COLUMNS: &str = "id, session_id, file_id, file_name, mime_type, status, \
     bytes_uploaded, total_bytes, chunk_index, total_chunks, upload_speed_bps, eta_seconds, \
     error_message, started_at, completed_at, updated_at";

/// Repository for the upload_sessions and upload_progress tables.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[tracing::instrument(
        skip(self, session, progresses),
        fields(db.table = "upload_sessions", session_id = %session.id, files = progresses.len())
    )]
    async fn create_session(
        &self,
        session: UploadSession,
        progresses: Vec<UploadProgress>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                id, tenant_id, owner_id, total_files, completed_files, failed_files,
                total_size_bytes, uploaded_size_bytes, status, created_at
            )
            VALUES ($1, $2, $3, $4, 0, 0, $5, 0, $6, $7)
            "#,
        )
        .bind(session.id)
        .bind(session.tenant_id)
        .bind(session.owner_id)
        .bind(session.total_files as i32)
        .bind(session.total_size_bytes as i64)
        .bind(session.status)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await?;

        for progress in &progresses {
            sqlx::query(
                r#"
                INSERT INTO upload_progress (
                    id, session_id, file_name, mime_type, status,
                    bytes_uploaded, total_bytes, chunk_index, total_chunks, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, 0, $6, 0, $7, $8)
                "#,
            )
            .bind(progress.id)
            .bind(progress.session_id)
            .bind(&progress.file_name)
            .bind(&progress.mime_type)
            .bind(progress.status)
            .bind(progress.total_bytes as i64)
            .bind(progress.total_chunks as i32)
            .bind(progress.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions", db.record_id = %session_id))]
    async fn get_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<UploadSession>, AppError> {
        let row: Option<SessionRow> = sqlx::query_as::<Postgres, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(session_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SessionRow::into_session))
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_progress", db.record_id = %progress_id))]
    async fn get_progress(&self, progress_id: Uuid) -> Result<Option<UploadProgress>, AppError> {
        let row: Option<ProgressRow> = sqlx::query_as::<Postgres, ProgressRow>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM upload_progress WHERE id = $1"
        ))
        .bind(progress_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProgressRow::into_progress))
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_progress", session_id = %session_id))]
    async fn list_progress(&self, session_id: Uuid) -> Result<Vec<UploadProgress>, AppError> {
        let rows: Vec<ProgressRow> = sqlx::query_as::<Postgres, ProgressRow>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM upload_progress WHERE session_id = $1 ORDER BY updated_at"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ProgressRow::into_progress).collect())
    }

    #[tracing::instrument(skip(self, update), fields(db.table = "upload_progress", db.record_id = %progress_id))]
    async fn update_chunk_progress(
        &self,
        progress_id: Uuid,
        update: ChunkProgressUpdate,
    ) -> Result<Option<UploadProgress>, AppError> {
        let row: Option<ProgressRow> = sqlx::query_as::<Postgres, ProgressRow>(&format!(
            r#"
            UPDATE upload_progress
            SET status = 'uploading',
                bytes_uploaded = $2,
                chunk_index = $3,
                upload_speed_bps = $4,
                eta_seconds = $5,
                started_at = COALESCE(started_at, $6),
                updated_at = $6
            WHERE id = $1 AND status IN ('pending', 'uploading')
            RETURNING {PROGRESS_COLUMNS}
            "#
        ))
        .bind(progress_id)
        .bind(update.bytes_uploaded as i64)
        .bind(update.chunk_index as i32)
        .bind(update.upload_speed_bps.map(|v| v as i64))
        .bind(update.eta_seconds.map(|v| v as i64))
        .bind(update.now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProgressRow::into_progress))
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_progress", db.record_id = %progress_id))]
    async fn complete_progress(
        &self,
        progress_id: Uuid,
        file_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadProgress>, AppError> {
        let row: Option<ProgressRow> = sqlx::query_as::<Postgres, ProgressRow>(&format!(
            r#"
            UPDATE upload_progress
            SET status = 'completed',
                file_id = $2,
                bytes_uploaded = total_bytes,
                completed_at = $3,
                updated_at = $3
            WHERE id = $1 AND status IN ('pending', 'uploading')
            RETURNING {PROGRESS_COLUMNS}
            "#
        ))
        .bind(progress_id)
        .bind(file_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProgressRow::into_progress))
    }

    #[tracing::instrument(skip(self, error_message), fields(db.table = "upload_progress", db.record_id = %progress_id))]
    async fn fail_progress(
        &self,
        progress_id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadProgress>, AppError> {
        let row: Option<ProgressRow> = sqlx::query_as::<Postgres, ProgressRow>(&format!(
            r#"
            UPDATE upload_progress
            SET status = 'failed', error_message = $2, updated_at = $3
            WHERE id = $1 AND status IN ('pending', 'uploading')
            RETURNING {PROGRESS_COLUMNS}
            "#
        ))
        .bind(progress_id)
        .bind(error_message)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProgressRow::into_progress))
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_progress", db.record_id = %progress_id))]
    async fn cancel_progress(
        &self,
        progress_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadProgress>, AppError> {
        let row: Option<ProgressRow> = sqlx::query_as::<Postgres, ProgressRow>(&format!(
            r#"
            UPDATE upload_progress
            SET status = 'cancelled', updated_at = $2
            WHERE id = $1 AND status IN ('pending', 'uploading')
            RETURNING {PROGRESS_COLUMNS}
            "#
        ))
        .bind(progress_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProgressRow::into_progress))
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions", db.record_id = %session_id))]
    async fn cancel_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadSession>, AppError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<SessionRow> = sqlx::query_as::<Postgres, SessionRow>(&format!(
            r#"
            UPDATE upload_sessions
            SET status = 'cancelled'
            WHERE id = $1 AND tenant_id = $2 AND status = 'active'
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE upload_progress
            SET status = 'cancelled', updated_at = $2
            WHERE session_id = $1 AND status IN ('pending', 'uploading')
            "#,
        )
        .bind(session_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.into_session()))
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_sessions", db.record_id = %session_id))]
    async fn recompute_aggregates(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadSession>, AppError> {
        let mut tx = self.pool.begin().await?;

        // Lock the session row: concurrent chunk reporters may interleave on
        // their own progress rows, but the aggregate write is serialized.
        let current: Option<SessionRow> = sqlx::query_as::<Postgres, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE id = $1 FOR UPDATE"
        ))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let (completed, failed, uploaded): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COALESCE(SUM(bytes_uploaded), 0)::BIGINT
            FROM upload_progress
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        let status = evaluate_session_status(
            current.status,
            current.total_files.max(0) as u32,
            completed.max(0) as u32,
            failed.max(0) as u32,
        );
        let completed_at = match (current.completed_at, status) {
            (Some(at), _) => Some(at),
            (None, SessionStatus::Completed) => Some(now),
            (None, _) => None,
        };

        let row: SessionRow = sqlx::query_as::<Postgres, SessionRow>(&format!(
            r#"
            UPDATE upload_sessions
            SET completed_files = $2,
                failed_files = $3,
                uploaded_size_bytes = $4,
                status = $5,
                completed_at = $6
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id)
        .bind(completed as i32)
        .bind(failed as i32)
        .bind(uploaded)
        .bind(status)
        .bind(completed_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.into_session()))
    }

    #[tracing::instrument(skip(self, error_message), fields(db.table = "upload_progress"))]
    async fn sweep_stale(
        &self,
        cutoff: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE upload_progress
            SET status = 'failed', error_message = $2, updated_at = $3
            WHERE status = 'uploading' AND updated_at < $1
            RETURNING session_id
            "#,
        )
        .bind(cutoff)
        .bind(error_message)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut session_ids: Vec<Uuid> = rows.into_iter().map(|(id,)| id).collect();
        session_ids.sort();
        session_ids.dedup();
        Ok(session_ids)
    }
}
