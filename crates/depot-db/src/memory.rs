//! In-memory store implementations.
//!
//! These back the engine tests and embedded runs without a database. Every
//! conditional transition the PostgreSQL implementations express in SQL
//! (status guards, the unique-content insert, the atomic token consume) is
//! enforced here under the store lock, so concurrency semantics match.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::models::{
    evaluate_session_status, AccessScope, DownloadToken, FileAssociation, NewFile, ProgressStatus,
    QuotaDelta, QuotaLedger, SessionStatus, StoredFile, UploadProgress, UploadSession,
};
use depot_core::AppError;
use uuid::Uuid;

use crate::traits::{
    ChunkProgressUpdate, DeltaOutcome, FileStore, InsertOutcome, QuotaStore, RedeemOutcome,
    SessionStore, TokenStore,
};

#[derive(Default)]
struct FileInner {
    files: HashMap<Uuid, StoredFile>,
    associations: Vec<FileAssociation>,
}

/// In-memory file store.
#[derive(Clone, Default)]
pub struct MemoryFileStore {
    inner: Arc<Mutex<FileInner>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of file rows, tombstoned included (for test assertions).
    pub fn file_count(&self) -> usize {
        self.inner.lock().unwrap().files.len()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn insert(&self, file: NewFile) -> Result<InsertOutcome, AppError> {
        let mut inner = self.inner.lock().unwrap();
        // Uniqueness check and insert under one lock, mirroring the partial
        // unique index on (tenant_id, content_hash).
        if let Some(existing) = inner
            .files
            .values()
            .find(|f| {
                f.tenant_id == file.tenant_id
                    && f.content_hash == file.content_hash
                    && f.tombstoned_at.is_none()
            })
            .cloned()
        {
            return Ok(InsertOutcome::Duplicate(existing));
        }

        let stored = StoredFile {
            id: Uuid::new_v4(),
            tenant_id: file.tenant_id,
            content_hash: file.content_hash,
            size_bytes: file.size_bytes,
            storage_key: file.storage_key,
            mime_type: file.mime_type,
            uploader_id: file.uploader_id,
            created_at: Utc::now(),
            tombstoned_at: None,
        };
        inner.files.insert(stored.id, stored.clone());
        Ok(InsertOutcome::Created(stored))
    }

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<StoredFile>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .files
            .get(&id)
            .filter(|f| f.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredFile>, AppError> {
        Ok(self.inner.lock().unwrap().files.get(&id).cloned())
    }

    async fn find_active_by_hash(
        &self,
        tenant_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<StoredFile>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .files
            .values()
            .find(|f| {
                f.tenant_id == tenant_id
                    && f.content_hash == content_hash
                    && f.tombstoned_at.is_none()
            })
            .cloned())
    }

    async fn tombstone(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredFile>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.files.get_mut(&id) {
            Some(f) if f.tenant_id == tenant_id && f.tombstoned_at.is_none() => {
                f.tombstoned_at = Some(now);
                Ok(Some(f.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn active_totals(&self, tenant_id: Uuid) -> Result<(u64, u64), AppError> {
        let inner = self.inner.lock().unwrap();
        let mut bytes: u64 = 0;
        let mut count: u64 = 0;
        for f in inner.files.values() {
            if f.tenant_id == tenant_id && f.tombstoned_at.is_none() {
                bytes += f.size_bytes;
                count += 1;
            }
        }
        Ok((bytes, count))
    }

    async fn create_association(
        &self,
        file_id: Uuid,
        context_id: Uuid,
        shared_by: Uuid,
        scope: AccessScope,
    ) -> Result<FileAssociation, AppError> {
        let association = FileAssociation {
            id: Uuid::new_v4(),
            file_id,
            context_id,
            shared_by,
            scope,
            created_at: Utc::now(),
        };
        self.inner
            .lock()
            .unwrap()
            .associations
            .push(association.clone());
        Ok(association)
    }

    async fn associations_for_file(
        &self,
        file_id: Uuid,
    ) -> Result<Vec<FileAssociation>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .associations
            .iter()
            .filter(|a| a.file_id == file_id)
            .cloned()
            .collect())
    }

    async fn purgeable_tombstones(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredFile>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .files
            .values()
            .filter(|f| {
                matches!(f.tombstoned_at, Some(at) if at < cutoff)
                    && !inner.files.values().any(|a| {
                        a.storage_key == f.storage_key && a.tombstoned_at.is_none()
                    })
            })
            .cloned()
            .collect())
    }

    async fn mark_blob_purged(&self, id: Uuid, _now: DateTime<Utc>) -> Result<(), AppError> {
        // The in-memory store drops the row outright; there is no audit
        // trail to preserve across process restarts.
        self.inner.lock().unwrap().files.remove(&id);
        Ok(())
    }
}

/// In-memory quota ledger store.
#[derive(Clone, Default)]
pub struct MemoryQuotaStore {
    ledgers: Arc<Mutex<HashMap<Uuid, QuotaLedger>>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn get_or_create(
        &self,
        tenant_id: Uuid,
        default_limit_bytes: u64,
    ) -> Result<QuotaLedger, AppError> {
        let mut ledgers = self.ledgers.lock().unwrap();
        Ok(ledgers
            .entry(tenant_id)
            .or_insert_with(|| QuotaLedger {
                tenant_id,
                limit_bytes: default_limit_bytes,
                used_bytes: 0,
                file_count: 0,
                last_reconciled_at: None,
            })
            .clone())
    }

    async fn get(&self, tenant_id: Uuid) -> Result<Option<QuotaLedger>, AppError> {
        Ok(self.ledgers.lock().unwrap().get(&tenant_id).cloned())
    }

    async fn apply_delta(
        &self,
        tenant_id: Uuid,
        delta: QuotaDelta,
    ) -> Result<DeltaOutcome, AppError> {
        let mut ledgers = self.ledgers.lock().unwrap();
        let ledger = ledgers.get_mut(&tenant_id).ok_or_else(|| {
            AppError::NotFound(format!("quota ledger for tenant {} not found", tenant_id))
        })?;

        let next_bytes = ledger.used_bytes as i128 + delta.bytes as i128;
        let next_count = ledger.file_count as i128 + delta.files as i128;
        let clamped = next_bytes < 0 || next_count < 0;

        ledger.used_bytes = next_bytes.max(0) as u64;
        ledger.file_count = next_count.max(0) as u64;

        Ok(DeltaOutcome {
            ledger: ledger.clone(),
            clamped,
        })
    }

    async fn overwrite_counters(
        &self,
        tenant_id: Uuid,
        used_bytes: u64,
        file_count: u64,
        reconciled_at: DateTime<Utc>,
    ) -> Result<QuotaLedger, AppError> {
        let mut ledgers = self.ledgers.lock().unwrap();
        let ledger = ledgers.get_mut(&tenant_id).ok_or_else(|| {
            AppError::NotFound(format!("quota ledger for tenant {} not found", tenant_id))
        })?;
        ledger.used_bytes = used_bytes;
        ledger.file_count = file_count;
        ledger.last_reconciled_at = Some(reconciled_at);
        Ok(ledger.clone())
    }

    async fn set_limit(&self, tenant_id: Uuid, limit_bytes: u64) -> Result<QuotaLedger, AppError> {
        let mut ledgers = self.ledgers.lock().unwrap();
        let ledger = ledgers.get_mut(&tenant_id).ok_or_else(|| {
            AppError::NotFound(format!("quota ledger for tenant {} not found", tenant_id))
        })?;
        ledger.limit_bytes = limit_bytes;
        Ok(ledger.clone())
    }
}

#[derive(Default)]
struct SessionInner {
    sessions: HashMap<Uuid, UploadSession>,
    progresses: HashMap<Uuid, UploadProgress>,
}

/// In-memory session store. One lock covers sessions and progress rows, so
/// aggregate recomputation is trivially serialized per session.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<SessionInner>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn transition_allowed(status: ProgressStatus) -> bool {
    matches!(status, ProgressStatus::Pending | ProgressStatus::Uploading)
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(
        &self,
        session: UploadSession,
        progresses: Vec<UploadProgress>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(session.id, session);
        for progress in progresses {
            inner.progresses.insert(progress.id, progress);
        }
        Ok(())
    }

    async fn get_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<UploadSession>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .sessions
            .get(&session_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_progress(&self, progress_id: Uuid) -> Result<Option<UploadProgress>, AppError> {
        Ok(self.inner.lock().unwrap().progresses.get(&progress_id).cloned())
    }

    async fn list_progress(&self, session_id: Uuid) -> Result<Vec<UploadProgress>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .progresses
            .values()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn update_chunk_progress(
        &self,
        progress_id: Uuid,
        update: ChunkProgressUpdate,
    ) -> Result<Option<UploadProgress>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.progresses.get_mut(&progress_id) {
            Some(p) if transition_allowed(p.status) => {
                p.status = ProgressStatus::Uploading;
                p.bytes_uploaded = update.bytes_uploaded;
                p.chunk_index = update.chunk_index;
                p.upload_speed_bps = update.upload_speed_bps;
                p.eta_seconds = update.eta_seconds;
                p.started_at = p.started_at.or(Some(update.now));
                p.updated_at = update.now;
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete_progress(
        &self,
        progress_id: Uuid,
        file_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadProgress>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.progresses.get_mut(&progress_id) {
            Some(p) if transition_allowed(p.status) => {
                p.status = ProgressStatus::Completed;
                p.file_id = Some(file_id);
                p.bytes_uploaded = p.total_bytes;
                p.completed_at = Some(now);
                p.updated_at = now;
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn fail_progress(
        &self,
        progress_id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadProgress>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.progresses.get_mut(&progress_id) {
            Some(p) if transition_allowed(p.status) => {
                p.status = ProgressStatus::Failed;
                p.error_message = Some(error_message.to_string());
                p.updated_at = now;
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn cancel_progress(
        &self,
        progress_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadProgress>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.progresses.get_mut(&progress_id) {
            Some(p) if transition_allowed(p.status) => {
                p.status = ProgressStatus::Cancelled;
                p.updated_at = now;
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn cancel_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadSession>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let session = match inner.sessions.get_mut(&session_id) {
            Some(s) if s.tenant_id == tenant_id && s.status == SessionStatus::Active => {
                s.status = SessionStatus::Cancelled;
                s.clone()
            }
            _ => return Ok(None),
        };
        for p in inner.progresses.values_mut() {
            if p.session_id == session_id && transition_allowed(p.status) {
                p.status = ProgressStatus::Cancelled;
                p.updated_at = now;
            }
        }
        Ok(Some(session))
    }

    async fn recompute_aggregates(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadSession>, AppError> {
        let mut inner = self.inner.lock().unwrap();

        let mut completed: u32 = 0;
        let mut failed: u32 = 0;
        let mut uploaded: u64 = 0;
        for p in inner.progresses.values() {
            if p.session_id != session_id {
                continue;
            }
            match p.status {
                ProgressStatus::Completed => completed += 1,
                ProgressStatus::Failed => failed += 1,
                _ => {}
            }
            uploaded += p.bytes_uploaded;
        }

        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        session.completed_files = completed;
        session.failed_files = failed;
        session.uploaded_size_bytes = uploaded;
        session.status =
            evaluate_session_status(session.status, session.total_files, completed, failed);
        if session.status == SessionStatus::Completed && session.completed_at.is_none() {
            session.completed_at = Some(now);
        }
        Ok(Some(session.clone()))
    }

    async fn sweep_stale(
        &self,
        cutoff: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let mut session_ids = Vec::new();
        for p in inner.progresses.values_mut() {
            if p.status == ProgressStatus::Uploading && p.updated_at < cutoff {
                p.status = ProgressStatus::Failed;
                p.error_message = Some(error_message.to_string());
                p.updated_at = now;
                session_ids.push(p.session_id);
            }
        }
        session_ids.sort();
        session_ids.dedup();
        Ok(session_ids)
    }
}

/// In-memory download token store.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    tokens: Arc<Mutex<HashMap<String, DownloadToken>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens (for test assertions).
    pub fn token_count(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, token: DownloadToken) -> Result<DownloadToken, AppError> {
        self.tokens
            .lock()
            .unwrap()
            .insert(token.secret.clone(), token.clone());
        Ok(token)
    }

    async fn get_by_secret(&self, secret: &str) -> Result<Option<DownloadToken>, AppError> {
        Ok(self.tokens.lock().unwrap().get(secret).cloned())
    }

    async fn redeem(&self, secret: &str, now: DateTime<Utc>) -> Result<RedeemOutcome, AppError> {
        // Check-and-increment under one lock: the in-memory equivalent of
        // the conditional UPDATE…RETURNING.
        let mut tokens = self.tokens.lock().unwrap();
        let Some(token) = tokens.get_mut(secret) else {
            return Ok(RedeemOutcome::NotFound);
        };
        if token.is_expired(now) {
            return Ok(RedeemOutcome::Expired);
        }
        if token.is_exhausted() {
            return Ok(RedeemOutcome::Exhausted);
        }
        token.use_count += 1;
        token.last_used_at = Some(now);
        Ok(RedeemOutcome::Redeemed(token.clone()))
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= cutoff);
        Ok((before - tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_file(tenant_id: Uuid, hash: &str, size: u64) -> NewFile {
        NewFile {
            tenant_id,
            content_hash: hash.to_string(),
            size_bytes: size,
            storage_key: format!("files/{}/{}", tenant_id, hash),
            mime_type: "application/octet-stream".to_string(),
            uploader_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_file_insert_resolves_duplicate() {
        let store = MemoryFileStore::new();
        let tenant = Uuid::new_v4();

        let first = store.insert(new_file(tenant, "aa", 10)).await.unwrap();
        let created = match first {
            InsertOutcome::Created(f) => f,
            InsertOutcome::Duplicate(_) => panic!("first insert must create"),
        };

        let second = store.insert(new_file(tenant, "aa", 10)).await.unwrap();
        match second {
            InsertOutcome::Duplicate(f) => assert_eq!(f.id, created.id),
            InsertOutcome::Created(_) => panic!("second insert must observe the winner"),
        }
        assert_eq!(store.file_count(), 1);
    }

    #[tokio::test]
    async fn test_tombstone_transitions_once() {
        let store = MemoryFileStore::new();
        let tenant = Uuid::new_v4();
        let InsertOutcome::Created(file) = store.insert(new_file(tenant, "bb", 7)).await.unwrap()
        else {
            panic!("expected creation");
        };

        let now = Utc::now();
        assert!(store.tombstone(tenant, file.id, now).await.unwrap().is_some());
        // Second tombstone is a no-op, so quota release happens exactly once.
        assert!(store.tombstone(tenant, file.id, now).await.unwrap().is_none());

        // The tombstoned hash is free for a fresh upload.
        let again = store.insert(new_file(tenant, "bb", 7)).await.unwrap();
        assert!(matches!(again, InsertOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_quota_delta_clamps_and_reports() {
        let store = MemoryQuotaStore::new();
        let tenant = Uuid::new_v4();
        store.get_or_create(tenant, 1000).await.unwrap();

        let up = store
            .apply_delta(tenant, QuotaDelta::commit(600))
            .await
            .unwrap();
        assert!(!up.clamped);
        assert_eq!(up.ledger.used_bytes, 600);

        let down = store
            .apply_delta(
                tenant,
                QuotaDelta {
                    bytes: -700,
                    files: -2,
                },
            )
            .await
            .unwrap();
        assert!(down.clamped);
        assert_eq!(down.ledger.used_bytes, 0);
        assert_eq!(down.ledger.file_count, 0);
    }

    #[tokio::test]
    async fn test_redeem_is_single_use() {
        let store = MemoryTokenStore::new();
        let now = Utc::now();
        let token = DownloadToken {
            id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            issued_to: Uuid::new_v4(),
            secret: "secret-one".to_string(),
            expires_at: now + Duration::hours(1),
            max_uses: 1,
            use_count: 0,
            created_at: now,
            last_used_at: None,
        };
        store.insert(token).await.unwrap();

        assert!(matches!(
            store.redeem("secret-one", now).await.unwrap(),
            RedeemOutcome::Redeemed(_)
        ));
        assert!(matches!(
            store.redeem("secret-one", now).await.unwrap(),
            RedeemOutcome::Exhausted
        ));
        assert!(matches!(
            store.redeem("unknown", now).await.unwrap(),
            RedeemOutcome::NotFound
        ));
    }
}
