//! Store trait abstractions.
//!
//! These traits define the persistence seam the engine services are written
//! against. The PostgreSQL implementations live in [`crate::postgres`]; the
//! in-memory implementations in [`crate::memory`] back the engine tests and
//! embedded runs. The two operations that resolve races under concurrency
//! (file insert, token redemption) return outcome enums so every
//! implementation is forced to make the atomic step explicit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::models::{
    AccessScope, DownloadToken, FileAssociation, NewFile, QuotaDelta, QuotaLedger, StoredFile,
    UploadProgress, UploadSession,
};
use depot_core::AppError;
use uuid::Uuid;

/// Result of committing a file row under the `(tenant_id, content_hash)`
/// uniqueness constraint. Two concurrent uploads of identical content may
/// both attempt the insert; exactly one creates, the other observes the
/// winner's row.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(StoredFile),
    Duplicate(StoredFile),
}

/// Result of the atomic token consume. The consume itself is a single
/// conditional update; the non-redeemed variants come from a follow-up
/// classification read.
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    Redeemed(DownloadToken),
    NotFound,
    Expired,
    Exhausted,
}

/// Ledger state after a delta, plus whether the delta had to be clamped at
/// zero (which indicates a missed or duplicated commit upstream).
#[derive(Debug, Clone)]
pub struct DeltaOutcome {
    pub ledger: QuotaLedger,
    pub clamped: bool,
}

/// Chunk-level progress fields computed by the tracker for one update.
#[derive(Debug, Clone)]
pub struct ChunkProgressUpdate {
    pub bytes_uploaded: u64,
    pub chunk_index: u32,
    pub upload_speed_bps: Option<u64>,
    pub eta_seconds: Option<u64>,
    pub now: DateTime<Utc>,
}

/// File rows and their sharing associations.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Commit a new file row, resolving the unique-content race.
    async fn insert(&self, file: NewFile) -> Result<InsertOutcome, AppError>;

    /// Fetch a file within a tenant.
    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<StoredFile>, AppError>;

    /// Fetch a file by id alone (token redemption path).
    async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredFile>, AppError>;

    /// Non-tombstoned file with this content hash in this tenant, if any.
    async fn find_active_by_hash(
        &self,
        tenant_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<StoredFile>, AppError>;

    /// Tombstone a file. Returns the row only when this call performed the
    /// transition, so the caller releases quota exactly once.
    async fn tombstone(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredFile>, AppError>;

    /// Single-pass `(sum of size_bytes, count)` over non-tombstoned rows.
    async fn active_totals(&self, tenant_id: Uuid) -> Result<(u64, u64), AppError>;

    async fn create_association(
        &self,
        file_id: Uuid,
        context_id: Uuid,
        shared_by: Uuid,
        scope: AccessScope,
    ) -> Result<FileAssociation, AppError>;

    async fn associations_for_file(&self, file_id: Uuid)
        -> Result<Vec<FileAssociation>, AppError>;

    /// Tombstoned files whose blob has not yet been purged and whose
    /// storage key is not shared with any active row. Cleanup input.
    async fn purgeable_tombstones(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredFile>, AppError>;

    /// Record that the blob behind a tombstoned row was deleted.
    async fn mark_blob_purged(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), AppError>;
}

/// Per-tenant quota counters.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Fetch the tenant's ledger, creating it with the given limit if absent.
    async fn get_or_create(
        &self,
        tenant_id: Uuid,
        default_limit_bytes: u64,
    ) -> Result<QuotaLedger, AppError>;

    async fn get(&self, tenant_id: Uuid) -> Result<Option<QuotaLedger>, AppError>;

    /// Apply a signed delta atomically, clamping counters at zero.
    async fn apply_delta(
        &self,
        tenant_id: Uuid,
        delta: QuotaDelta,
    ) -> Result<DeltaOutcome, AppError>;

    /// Overwrite the counters with a recount (reconciliation).
    async fn overwrite_counters(
        &self,
        tenant_id: Uuid,
        used_bytes: u64,
        file_count: u64,
        reconciled_at: DateTime<Utc>,
    ) -> Result<QuotaLedger, AppError>;

    /// Rewrite the limit (plan change); usage counters are untouched.
    async fn set_limit(&self, tenant_id: Uuid, limit_bytes: u64) -> Result<QuotaLedger, AppError>;
}

/// Upload sessions and their per-file progress rows.
///
/// Progress transitions are conditional on the prior state so terminal
/// states are final and sweeps stay idempotent: a transition returns `None`
/// when the row was absent or already past the expected state. Aggregate
/// recomputation is serialized per session by the implementation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        session: UploadSession,
        progresses: Vec<UploadProgress>,
    ) -> Result<(), AppError>;

    async fn get_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<UploadSession>, AppError>;

    async fn get_progress(&self, progress_id: Uuid) -> Result<Option<UploadProgress>, AppError>;

    async fn list_progress(&self, session_id: Uuid) -> Result<Vec<UploadProgress>, AppError>;

    /// PENDING/UPLOADING -> UPLOADING with fresh chunk accounting; stamps
    /// `started_at` on the first update.
    async fn update_chunk_progress(
        &self,
        progress_id: Uuid,
        update: ChunkProgressUpdate,
    ) -> Result<Option<UploadProgress>, AppError>;

    /// PENDING/UPLOADING -> COMPLETED; binds the committed file id.
    async fn complete_progress(
        &self,
        progress_id: Uuid,
        file_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadProgress>, AppError>;

    /// PENDING/UPLOADING -> FAILED with an error message.
    async fn fail_progress(
        &self,
        progress_id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadProgress>, AppError>;

    /// PENDING/UPLOADING -> CANCELLED.
    async fn cancel_progress(
        &self,
        progress_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadProgress>, AppError>;

    /// ACTIVE session -> CANCELLED, cancelling all non-terminal children.
    async fn cancel_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadSession>, AppError>;

    /// Recompute the session's derived counters and status from its
    /// children. Single-writer-at-a-time per session row.
    async fn recompute_aggregates(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadSession>, AppError>;

    /// Fail every UPLOADING row whose last update predates `cutoff`.
    /// Returns the distinct session ids that had rows moved.
    async fn sweep_stale(
        &self,
        cutoff: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError>;
}

/// Issued download tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: DownloadToken) -> Result<DownloadToken, AppError>;

    async fn get_by_secret(&self, secret: &str) -> Result<Option<DownloadToken>, AppError>;

    /// Consume one use as a single atomic unit: the expiry and use-count
    /// checks and the increment happen together, never as read-then-write.
    async fn redeem(&self, secret: &str, now: DateTime<Utc>) -> Result<RedeemOutcome, AppError>;

    /// Delete tokens that expired before `cutoff`. Returns rows removed.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}
