//! Quota ledger repository: one counters row per tenant.

use chrono::{DateTime, Utc};
use depot_core::models::{QuotaDelta, QuotaLedger};
use depot_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::traits::{DeltaOutcome, QuotaStore};
use async_trait::async_trait;

/// Row type for the quota_ledgers table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    tenant_id: Uuid,
    limit_bytes: i64,
    used_bytes: i64,
    file_count: i64,
    last_reconciled_at: Option<DateTime<Utc>>,
}

impl LedgerRow {
    fn into_ledger(self) -> QuotaLedger {
        QuotaLedger {
            tenant_id: self.tenant_id,
            limit_bytes: self.limit_bytes as u64,
            used_bytes: self.used_bytes.max(0) as u64,
            file_count: self.file_count.max(0) as u64,
            last_reconciled_at: self.last_reconciled_at,
        }
    }
}

/// Row returned by the delta update: new counters plus the pre-update
/// values so the caller can detect a clamped (inconsistent) delta.
#[derive(Debug, sqlx::FromRow)]
struct DeltaRow {
    tenant_id: Uuid,
    limit_bytes: i64,
    used_bytes: i64,
    file_count: i64,
    last_reconciled_at: Option<DateTime<Utc>>,
    previous_used_bytes: i64,
    previous_file_count: i64,
}

const LEDGER_COLUMNS: &str =
    "tenant_id, limit_bytes, used_bytes, file_count, last_reconciled_at";

/// Repository for the quota_ledgers table.
#[derive(Clone)]
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    #[tracing::instrument(skip(self), fields(db.table = "quota_ledgers", tenant_id = %tenant_id))]
    async fn get_or_create(
        &self,
        tenant_id: Uuid,
        default_limit_bytes: u64,
    ) -> Result<QuotaLedger, AppError> {
        let row: LedgerRow = sqlx::query_as::<Postgres, LedgerRow>(&format!(
            r#"
            INSERT INTO quota_ledgers (tenant_id, limit_bytes, used_bytes, file_count)
            VALUES ($1, $2, 0, 0)
            ON CONFLICT (tenant_id) DO UPDATE SET tenant_id = EXCLUDED.tenant_id
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(default_limit_bytes as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_ledger())
    }

    #[tracing::instrument(skip(self), fields(db.table = "quota_ledgers", tenant_id = %tenant_id))]
    async fn get(&self, tenant_id: Uuid) -> Result<Option<QuotaLedger>, AppError> {
        let row: Option<LedgerRow> = sqlx::query_as::<Postgres, LedgerRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM quota_ledgers WHERE tenant_id = $1"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(LedgerRow::into_ledger))
    }

    /// Single-statement delta with a zero clamp. The CTE row-locks the
    /// ledger and exposes the pre-update counters, so a delta that would go
    /// negative is detectable without a second round trip.
    #[tracing::instrument(skip(self), fields(db.table = "quota_ledgers", tenant_id = %tenant_id))]
    async fn apply_delta(
        &self,
        tenant_id: Uuid,
        delta: QuotaDelta,
    ) -> Result<DeltaOutcome, AppError> {
        let row: Option<DeltaRow> = sqlx::query_as::<Postgres, DeltaRow>(
            r#"
            WITH previous AS (
                SELECT tenant_id, used_bytes, file_count
                FROM quota_ledgers
                WHERE tenant_id = $1
                FOR UPDATE
            )
            UPDATE quota_ledgers q
            SET used_bytes = GREATEST(0, q.used_bytes + $2),
                file_count = GREATEST(0, q.file_count + $3)
            FROM previous p
            WHERE q.tenant_id = p.tenant_id
            RETURNING q.tenant_id, q.limit_bytes, q.used_bytes, q.file_count,
                      q.last_reconciled_at,
                      p.used_bytes AS previous_used_bytes,
                      p.file_count AS previous_file_count
            "#,
        )
        .bind(tenant_id)
        .bind(delta.bytes)
        .bind(delta.files)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| {
            AppError::NotFound(format!("quota ledger for tenant {} not found", tenant_id))
        })?;

        let clamped = row.previous_used_bytes + delta.bytes < 0
            || row.previous_file_count + (delta.files as i64) < 0;

        Ok(DeltaOutcome {
            ledger: LedgerRow {
                tenant_id: row.tenant_id,
                limit_bytes: row.limit_bytes,
                used_bytes: row.used_bytes,
                file_count: row.file_count,
                last_reconciled_at: row.last_reconciled_at,
            }
            .into_ledger(),
            clamped,
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "quota_ledgers", tenant_id = %tenant_id))]
    async fn overwrite_counters(
        &self,
        tenant_id: Uuid,
        used_bytes: u64,
        file_count: u64,
        reconciled_at: DateTime<Utc>,
    ) -> Result<QuotaLedger, AppError> {
        let row: Option<LedgerRow> = sqlx::query_as::<Postgres, LedgerRow>(&format!(
            r#"
            UPDATE quota_ledgers
            SET used_bytes = $2, file_count = $3, last_reconciled_at = $4
            WHERE tenant_id = $1
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(used_bytes as i64)
        .bind(file_count as i64)
        .bind(reconciled_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LedgerRow::into_ledger).ok_or_else(|| {
            AppError::NotFound(format!("quota ledger for tenant {} not found", tenant_id))
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "quota_ledgers", tenant_id = %tenant_id))]
    async fn set_limit(&self, tenant_id: Uuid, limit_bytes: u64) -> Result<QuotaLedger, AppError> {
        let row: Option<LedgerRow> = sqlx::query_as::<Postgres, LedgerRow>(&format!(
            r#"
            UPDATE quota_ledgers
            SET limit_bytes = $2
            WHERE tenant_id = $1
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(limit_bytes as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LedgerRow::into_ledger).ok_or_else(|| {
            AppError::NotFound(format!("quota ledger for tenant {} not found", tenant_id))
        })
    }
}
