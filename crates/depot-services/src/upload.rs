//! Upload session tracker: batch declaration, chunk progress, and the
//! commit pipeline.
//!
//! The commit order for new content is fixed: admission check, blob write,
//! file commit, ledger commit, progress completion, session aggregation.
//! A failed or timed-out blob write therefore never leaves a ledger
//! mutation behind; a crash between blob write and ledger commit is healed
//! by reconciliation.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use depot_core::models::{
    FileDeclaration, NewFile, ProgressStatus, SessionStatus, StoredFile, UploadProgress,
    UploadSession,
};
use depot_core::{AppError, EngineConfig};
use depot_db::{ChunkProgressUpdate, FileStore, InsertOutcome, SessionStore};
use depot_storage::{content_key, with_retries, BlobStore};
use uuid::Uuid;

use crate::dedup::{DedupOutcome, HashDeduplicator};
use crate::quota::QuotaService;

/// Result of completing one file within a session.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub file: StoredFile,
    /// True when the bytes resolved to an already-committed file and no new
    /// blob or quota charge was made.
    pub deduplicated: bool,
    pub session: UploadSession,
}

/// Instantaneous transfer rate for one chunk, in bytes per second.
/// `None` until there is a measurable interval to divide by.
fn chunk_rate_bps(bytes_in_chunk: u64, elapsed_ms: i64) -> Option<u64> {
    if elapsed_ms <= 0 {
        return None;
    }
    Some((bytes_in_chunk as f64 / (elapsed_ms as f64 / 1000.0)) as u64)
}

/// Remaining seconds at the given rate; `None` means unknown.
fn eta_seconds(remaining_bytes: u64, rate_bps: Option<u64>) -> Option<u64> {
    match rate_bps {
        Some(rate) if rate > 0 => Some(remaining_bytes / rate),
        _ => None,
    }
}

#[derive(Clone)]
pub struct UploadService {
    sessions: Arc<dyn SessionStore>,
    files: Arc<dyn FileStore>,
    blobs: Arc<dyn BlobStore>,
    dedup: HashDeduplicator,
    quota: QuotaService,
    config: EngineConfig,
}

impl UploadService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        files: Arc<dyn FileStore>,
        blobs: Arc<dyn BlobStore>,
        quota: QuotaService,
        config: EngineConfig,
    ) -> Self {
        let dedup = HashDeduplicator::new(files.clone());
        Self {
            sessions,
            files,
            blobs,
            dedup,
            quota,
            config,
        }
    }

    /// Declare a batch of files for upload: one ACTIVE session owning one
    /// PENDING progress row per file.
    #[tracing::instrument(skip(self, declarations), fields(tenant_id = %tenant_id, files = declarations.len()))]
    pub async fn initiate_session(
        &self,
        tenant_id: Uuid,
        owner_id: Uuid,
        declarations: Vec<FileDeclaration>,
    ) -> Result<(UploadSession, Vec<UploadProgress>), AppError> {
        if declarations.is_empty() {
            return Err(AppError::InvalidInput(
                "an upload session must declare at least one file".to_string(),
            ));
        }

        let now = Utc::now();
        let session = UploadSession {
            id: Uuid::new_v4(),
            tenant_id,
            owner_id,
            total_files: declarations.len() as u32,
            completed_files: 0,
            failed_files: 0,
            total_size_bytes: declarations.iter().map(|d| d.total_size_bytes).sum(),
            uploaded_size_bytes: 0,
            status: SessionStatus::Active,
            created_at: now,
            completed_at: None,
        };

        let progresses: Vec<UploadProgress> = declarations
            .iter()
            .map(|d| UploadProgress {
                id: Uuid::new_v4(),
                session_id: session.id,
                file_id: None,
                file_name: d.file_name.clone(),
                mime_type: d.mime_type.clone(),
                status: ProgressStatus::Pending,
                bytes_uploaded: 0,
                total_bytes: d.total_size_bytes,
                chunk_index: 0,
                total_chunks: d.total_chunks(),
                upload_speed_bps: None,
                eta_seconds: None,
                error_message: None,
                started_at: None,
                completed_at: None,
                updated_at: now,
            })
            .collect();

        self.sessions
            .create_session(session.clone(), progresses.clone())
            .await?;

        tracing::info!(
            session_id = %session.id,
            tenant_id = %tenant_id,
            total_files = session.total_files,
            total_size_bytes = session.total_size_bytes,
            "Upload session initiated"
        );

        Ok((session, progresses))
    }

    pub async fn get_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<UploadSession, AppError> {
        self.sessions
            .get_session(tenant_id, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("upload session {} not found", session_id)))
    }

    pub async fn session_overview(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<(UploadSession, Vec<UploadProgress>), AppError> {
        let session = self.get_session(tenant_id, session_id).await?;
        let progresses = self.sessions.list_progress(session_id).await?;
        Ok((session, progresses))
    }

    /// Record one chunk for a file in the session, recomputing transfer
    /// rate and ETA. Each progress row is only ever written by its own
    /// uploader, so the read-compute-write here needs no cross-file lock.
    #[tracing::instrument(skip(self), fields(session_id = %session_id, progress_id = %progress_id))]
    pub async fn report_chunk(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        progress_id: Uuid,
        chunk_index: u32,
        bytes_in_chunk: u64,
    ) -> Result<UploadProgress, AppError> {
        self.active_session(tenant_id, session_id).await?;
        let previous = self.owned_progress(session_id, progress_id).await?;

        if previous.status.is_terminal() {
            return Err(AppError::SessionNotActive(format!(
                "upload progress {} is already {:?}",
                progress_id, previous.status
            )));
        }
        if previous.total_chunks > 0 && chunk_index >= previous.total_chunks {
            return Err(AppError::InvalidInput(format!(
                "chunk index {} exceeds total chunks {}",
                chunk_index, previous.total_chunks
            )));
        }

        let now = Utc::now();
        let bytes_uploaded = previous.bytes_uploaded.saturating_add(bytes_in_chunk);
        // Rate is measured against the previous update; the first chunk has
        // no baseline and reports unknown.
        let rate = if previous.status == ProgressStatus::Uploading {
            chunk_rate_bps(bytes_in_chunk, (now - previous.updated_at).num_milliseconds())
        } else {
            None
        };
        let eta = eta_seconds(previous.total_bytes.saturating_sub(bytes_uploaded), rate);

        let updated = self
            .sessions
            .update_chunk_progress(
                progress_id,
                ChunkProgressUpdate {
                    bytes_uploaded,
                    chunk_index,
                    upload_speed_bps: rate,
                    eta_seconds: eta,
                    now,
                },
            )
            .await?
            .ok_or_else(|| {
                AppError::SessionNotActive(format!(
                    "upload progress {} is no longer accepting chunks",
                    progress_id
                ))
            })?;

        self.sessions.recompute_aggregates(session_id, now).await?;
        Ok(updated)
    }

    /// Commit the full content for one file in the session.
    ///
    /// Duplicate content short-circuits: no blob write, no quota change,
    /// the progress still completes against the existing file.
    #[tracing::instrument(skip(self, content), fields(session_id = %session_id, progress_id = %progress_id, size_bytes = content.len()))]
    pub async fn complete_file(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        progress_id: Uuid,
        uploader_id: Uuid,
        content: Bytes,
    ) -> Result<CompletedUpload, AppError> {
        self.active_session(tenant_id, session_id).await?;
        let progress = self.owned_progress(session_id, progress_id).await?;
        if progress.status.is_terminal() {
            return Err(AppError::SessionNotActive(format!(
                "upload progress {} is already {:?}",
                progress_id, progress.status
            )));
        }

        let (file, deduplicated) = match self.dedup.resolve(tenant_id, &content).await? {
            DedupOutcome::Existing(file) => (file, true),
            DedupOutcome::New { content_hash } => {
                let size_bytes = content.len() as u64;

                // Admission precedes the blob write and is never retried.
                if let Err(err) = self.quota.check_admission(tenant_id, size_bytes).await {
                    self.fail_and_aggregate(session_id, progress_id, &err.to_string())
                        .await?;
                    return Err(err);
                }

                let storage_key = content_key(tenant_id, &content_hash);
                if let Err(err) = self.put_blob(&storage_key, &content, &progress.mime_type).await
                {
                    self.fail_and_aggregate(session_id, progress_id, &err.to_string())
                        .await?;
                    return Err(err);
                }

                match self
                    .files
                    .insert(NewFile {
                        tenant_id,
                        content_hash,
                        size_bytes,
                        storage_key,
                        mime_type: progress.mime_type.clone(),
                        uploader_id,
                    })
                    .await?
                {
                    InsertOutcome::Created(file) => {
                        self.quota.commit(tenant_id, file.size_bytes).await?;
                        (file, false)
                    }
                    // Lost the commit race to a concurrent identical upload;
                    // the winner's commit already charged the quota, and the
                    // blob write landed on the same content-addressed key.
                    InsertOutcome::Duplicate(file) => (file, true),
                }
            }
        };

        let now = Utc::now();
        if self
            .sessions
            .complete_progress(progress_id, file.id, now)
            .await?
            .is_none()
        {
            // The progress was cancelled or failed while the bytes were in
            // flight. The file commit is durable either way; only the
            // session bookkeeping misses it.
            tracing::warn!(
                progress_id = %progress_id,
                file_id = %file.id,
                "Progress reached a terminal state during file commit"
            );
        }

        let session = self
            .sessions
            .recompute_aggregates(session_id, now)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("upload session {} not found", session_id)))?;

        tracing::info!(
            session_id = %session_id,
            file_id = %file.id,
            deduplicated,
            "File upload completed"
        );

        Ok(CompletedUpload {
            file,
            deduplicated,
            session,
        })
    }

    /// Explicit failure report from the uploader.
    #[tracing::instrument(skip(self, error_message), fields(session_id = %session_id, progress_id = %progress_id))]
    pub async fn fail_file(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        progress_id: Uuid,
        error_message: &str,
    ) -> Result<UploadSession, AppError> {
        self.active_session(tenant_id, session_id).await?;
        self.owned_progress(session_id, progress_id).await?;
        self.fail_and_aggregate(session_id, progress_id, error_message)
            .await?;
        self.get_session(tenant_id, session_id).await
    }

    /// Cancel one file in the session.
    #[tracing::instrument(skip(self), fields(session_id = %session_id, progress_id = %progress_id))]
    pub async fn cancel_file(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        progress_id: Uuid,
    ) -> Result<UploadSession, AppError> {
        self.active_session(tenant_id, session_id).await?;
        self.owned_progress(session_id, progress_id).await?;
        let now = Utc::now();
        self.sessions.cancel_progress(progress_id, now).await?;
        self.sessions.recompute_aggregates(session_id, now).await?;
        self.get_session(tenant_id, session_id).await
    }

    /// Cancel the whole session and every non-terminal file in it.
    #[tracing::instrument(skip(self), fields(session_id = %session_id))]
    pub async fn cancel_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<UploadSession, AppError> {
        match self
            .sessions
            .cancel_session(tenant_id, session_id, Utc::now())
            .await?
        {
            Some(session) => Ok(session),
            None => {
                let session = self.get_session(tenant_id, session_id).await?;
                Err(AppError::SessionNotActive(format!(
                    "upload session {} is {:?}",
                    session_id, session.status
                )))
            }
        }
    }

    /// Fail every UPLOADING row with no update inside the staleness window
    /// and re-aggregate the affected sessions. Idempotent: the transition
    /// only moves rows still in UPLOADING, so concurrent sweepers are safe.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_stale(&self) -> Result<usize, AppError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(self.config.stale_upload_window_secs as i64);
        let session_ids = self
            .sessions
            .sweep_stale(cutoff, "upload timed out waiting for progress", now)
            .await?;

        for session_id in &session_ids {
            self.sessions.recompute_aggregates(*session_id, now).await?;
        }

        if !session_ids.is_empty() {
            tracing::info!(
                sessions = session_ids.len(),
                "Stale upload progress swept to failed"
            );
        }
        Ok(session_ids.len())
    }

    async fn active_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<UploadSession, AppError> {
        let session = self.get_session(tenant_id, session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(AppError::SessionNotActive(format!(
                "upload session {} is {:?}",
                session_id, session.status
            )));
        }
        Ok(session)
    }

    async fn owned_progress(
        &self,
        session_id: Uuid,
        progress_id: Uuid,
    ) -> Result<UploadProgress, AppError> {
        let progress = self
            .sessions
            .get_progress(progress_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("upload progress {} not found", progress_id))
            })?;
        if progress.session_id != session_id {
            return Err(AppError::NotFound(format!(
                "upload progress {} not found",
                progress_id
            )));
        }
        Ok(progress)
    }

    async fn fail_and_aggregate(
        &self,
        session_id: Uuid,
        progress_id: Uuid,
        error_message: &str,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        self.sessions
            .fail_progress(progress_id, error_message, now)
            .await?;
        self.sessions.recompute_aggregates(session_id, now).await?;
        Ok(())
    }

    /// Blob write bounded by a timeout, with bounded retries for transient
    /// failures inside that window.
    async fn put_blob(
        &self,
        storage_key: &str,
        content: &Bytes,
        content_type: &str,
    ) -> Result<(), AppError> {
        let attempts = self.config.blob_retry_attempts;
        let put = with_retries("blob put", attempts, || {
            self.blobs.put(storage_key, content.clone(), content_type)
        });

        match tokio::time::timeout(Duration::from_secs(self.config.blob_put_timeout_secs), put)
            .await
        {
            Ok(Ok(_url)) => Ok(()),
            Ok(Err(err)) => Err(AppError::Storage(err.to_string())),
            Err(_) => Err(AppError::Storage(format!(
                "blob put timed out after {}s",
                self.config.blob_put_timeout_secs
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_rate() {
        // 1000 bytes over 500ms = 2000 B/s.
        assert_eq!(chunk_rate_bps(1000, 500), Some(2000));
        assert_eq!(chunk_rate_bps(1000, 0), None);
        assert_eq!(chunk_rate_bps(1000, -5), None);
    }

    #[test]
    fn test_eta_seconds() {
        assert_eq!(eta_seconds(4000, Some(2000)), Some(2));
        // A zero rate reports unknown, not infinity.
        assert_eq!(eta_seconds(4000, Some(0)), None);
        assert_eq!(eta_seconds(4000, None), None);
        assert_eq!(eta_seconds(0, Some(100)), Some(0));
    }
}
