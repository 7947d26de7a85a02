//! Quota ledger service: admission, commit/release, reconciliation.

use std::sync::Arc;

use chrono::Utc;
use depot_core::models::{usage_of, PlanTier, QuotaDelta, QuotaLedger, QuotaUsage};
use depot_core::AppError;
use depot_db::{FileStore, QuotaStore};
use uuid::Uuid;

#[derive(Clone)]
pub struct QuotaService {
    quotas: Arc<dyn QuotaStore>,
    files: Arc<dyn FileStore>,
    /// Limit assigned to ledgers created on first touch (the 1x tier).
    base_quota_bytes: u64,
}

impl QuotaService {
    pub fn new(quotas: Arc<dyn QuotaStore>, files: Arc<dyn FileStore>, base_quota_bytes: u64) -> Self {
        Self {
            quotas,
            files,
            base_quota_bytes,
        }
    }

    /// Advisory admission check, evaluated before any blob write.
    ///
    /// Admission is not a reservation: a concurrent upload can pass this
    /// check before another upload's commit lands, so the ledger may
    /// transiently overshoot the limit. Reconciliation and the commit-side
    /// clamp keep the counters honest; rejected requests are never retried
    /// automatically.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn check_admission(
        &self,
        tenant_id: Uuid,
        additional_bytes: u64,
    ) -> Result<(), AppError> {
        let ledger = self
            .quotas
            .get_or_create(tenant_id, self.base_quota_bytes)
            .await?;

        // Widened arithmetic: byte counts can exceed 2^53, so the
        // comparison must not round through a float or overflow u64.
        if ledger.used_bytes as u128 + additional_bytes as u128 > ledger.limit_bytes as u128 {
            tracing::warn!(
                tenant_id = %tenant_id,
                used_bytes = ledger.used_bytes,
                limit_bytes = ledger.limit_bytes,
                requested_bytes = additional_bytes,
                "Quota admission rejected"
            );
            return Err(AppError::QuotaExceeded {
                used: ledger.used_bytes,
                limit: ledger.limit_bytes,
                requested: additional_bytes,
            });
        }
        Ok(())
    }

    /// Charge a freshly committed file to the ledger: `(+size, +1)`.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn commit(&self, tenant_id: Uuid, size_bytes: u64) -> Result<QuotaLedger, AppError> {
        self.quotas
            .get_or_create(tenant_id, self.base_quota_bytes)
            .await?;
        let outcome = self
            .quotas
            .apply_delta(tenant_id, QuotaDelta::commit(size_bytes))
            .await?;
        Ok(outcome.ledger)
    }

    /// Release a tombstoned file from the ledger: `(-size, -1)`.
    ///
    /// A release that would drive a counter negative clamps at zero; that
    /// only happens when a commit was missed or duplicated, so it is logged
    /// as an inconsistency.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn release(&self, tenant_id: Uuid, size_bytes: u64) -> Result<QuotaLedger, AppError> {
        let outcome = self
            .quotas
            .apply_delta(tenant_id, QuotaDelta::release(size_bytes))
            .await?;
        if outcome.clamped {
            tracing::warn!(
                tenant_id = %tenant_id,
                released_bytes = size_bytes,
                used_bytes = outcome.ledger.used_bytes,
                file_count = outcome.ledger.file_count,
                "Quota release clamped at zero; ledger was inconsistent"
            );
        }
        Ok(outcome.ledger)
    }

    /// Recount the tenant's non-tombstoned files and overwrite the ledger.
    ///
    /// Runs concurrently with live traffic; the recount is a single query
    /// pass and the overwrite may be immediately stale again. That is
    /// eventual consistency, not an error.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn reconcile(&self, tenant_id: Uuid) -> Result<QuotaLedger, AppError> {
        self.quotas
            .get_or_create(tenant_id, self.base_quota_bytes)
            .await?;
        let (used_bytes, file_count) = self.files.active_totals(tenant_id).await?;
        let ledger = self
            .quotas
            .overwrite_counters(tenant_id, used_bytes, file_count, Utc::now())
            .await?;
        tracing::info!(
            tenant_id = %tenant_id,
            used_bytes,
            file_count,
            "Quota ledger reconciled"
        );
        Ok(ledger)
    }

    /// Reporting view of the tenant's ledger.
    pub async fn get_usage(&self, tenant_id: Uuid) -> Result<QuotaUsage, AppError> {
        let ledger = self
            .quotas
            .get_or_create(tenant_id, self.base_quota_bytes)
            .await?;
        Ok(usage_of(&ledger))
    }

    /// Rewrite the limit for a plan change. Usage counters are untouched.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id, plan = ?tier))]
    pub async fn set_plan(&self, tenant_id: Uuid, tier: PlanTier) -> Result<QuotaLedger, AppError> {
        self.quotas
            .get_or_create(tenant_id, self.base_quota_bytes)
            .await?;
        let limit = tier.multiplier().saturating_mul(self.base_quota_bytes);
        self.quotas.set_limit(tenant_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::models::NewFile;
    use depot_db::{InsertOutcome, MemoryFileStore, MemoryQuotaStore};

    const FIVE_GIB: u64 = 5 * 1024 * 1024 * 1024;

    fn service(files: Arc<MemoryFileStore>) -> QuotaService {
        QuotaService::new(Arc::new(MemoryQuotaStore::new()), files, FIVE_GIB)
    }

    #[tokio::test]
    async fn test_admission_boundary() {
        let quota = service(Arc::new(MemoryFileStore::new()));
        let tenant = Uuid::new_v4();

        // Exactly the limit is admitted; one byte over is rejected.
        assert!(quota.check_admission(tenant, FIVE_GIB).await.is_ok());
        let err = quota.check_admission(tenant, FIVE_GIB + 1).await.unwrap_err();
        match err {
            AppError::QuotaExceeded {
                used,
                limit,
                requested,
            } => {
                assert_eq!(used, 0);
                assert_eq!(limit, FIVE_GIB);
                assert_eq!(requested, FIVE_GIB + 1);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_then_release_roundtrips() {
        let quota = service(Arc::new(MemoryFileStore::new()));
        let tenant = Uuid::new_v4();

        let ledger = quota.commit(tenant, 1000).await.unwrap();
        assert_eq!(ledger.used_bytes, 1000);
        assert_eq!(ledger.file_count, 1);

        let ledger = quota.release(tenant, 1000).await.unwrap();
        assert_eq!(ledger.used_bytes, 0);
        assert_eq!(ledger.file_count, 0);
    }

    #[tokio::test]
    async fn test_release_without_commit_clamps_at_zero() {
        let quota = service(Arc::new(MemoryFileStore::new()));
        let tenant = Uuid::new_v4();
        quota.commit(tenant, 10).await.unwrap();

        // Releasing more than was ever committed is a missed/duplicated
        // commit somewhere; counters clamp instead of going negative.
        let ledger = quota.release(tenant, 500).await.unwrap();
        assert_eq!(ledger.used_bytes, 0);
    }

    #[tokio::test]
    async fn test_reconcile_overwrites_drift() {
        let files = Arc::new(MemoryFileStore::new());
        let quota = service(files.clone());
        let tenant = Uuid::new_v4();

        for (hash, size) in [("a", 100u64), ("b", 250), ("c", 50)] {
            let InsertOutcome::Created(_) = files
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
        }

        // Desynchronize the ledger on purpose, then reconcile.
        quota.commit(tenant, 999_999).await.unwrap();
        let ledger = quota.reconcile(tenant).await.unwrap();
        assert_eq!(ledger.used_bytes, 400);
        assert_eq!(ledger.file_count, 3);
        assert!(ledger.last_reconciled_at.is_some());
    }

    #[tokio::test]
    async fn test_set_plan_keeps_usage() {
        let quota = service(Arc::new(MemoryFileStore::new()));
        let tenant = Uuid::new_v4();
        quota.commit(tenant, 777).await.unwrap();

        let ledger = quota.set_plan(tenant, PlanTier::Business).await.unwrap();
        assert_eq!(ledger.limit_bytes, 100 * FIVE_GIB);
        assert_eq!(ledger.used_bytes, 777);
    }
}
