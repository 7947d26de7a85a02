use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bytesize::used_percent;

/// Per-tenant storage counters.
///
/// Soft invariant: `used_bytes` equals the sum of `size_bytes` over the
/// tenant's non-tombstoned files. The counters are adjusted incrementally
/// on commit/tombstone and may transiently lag; reconciliation recounts
/// from the file rows and overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaLedger {
    pub tenant_id: Uuid,
    pub limit_bytes: u64,
    pub used_bytes: u64,
    pub file_count: u64,
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

/// Signed adjustment applied to a ledger, exactly once per file lifecycle
/// transition: creation is `(+size, +1)`, tombstoning is `(-size, -1)`.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDelta {
    pub bytes: i64,
    pub files: i32,
}

impl QuotaDelta {
    pub fn commit(size_bytes: u64) -> Self {
        Self {
            bytes: size_bytes as i64,
            files: 1,
        }
    }

    pub fn release(size_bytes: u64) -> Self {
        Self {
            bytes: -(size_bytes as i64),
            files: -1,
        }
    }
}

/// Read model for quota reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub tenant_id: Uuid,
    pub limit_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub used_percent: f64,
    pub file_count: u64,
}

/// Build the reporting view from a ledger row. Display only; admission
/// decisions never go through the floating-point percentage.
pub fn usage_of(ledger: &QuotaLedger) -> QuotaUsage {
    QuotaUsage {
        tenant_id: ledger.tenant_id,
        limit_bytes: ledger.limit_bytes,
        used_bytes: ledger.used_bytes,
        available_bytes: ledger.limit_bytes.saturating_sub(ledger.used_bytes),
        used_percent: used_percent(ledger.used_bytes, ledger.limit_bytes),
        file_count: ledger.file_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(used: u64, limit: u64) -> QuotaLedger {
        QuotaLedger {
            tenant_id: Uuid::new_v4(),
            limit_bytes: limit,
            used_bytes: used,
            file_count: 3,
            last_reconciled_at: None,
        }
    }

    #[test]
    fn test_usage_of() {
        let usage = usage_of(&ledger(250, 1000));
        assert_eq!(usage.available_bytes, 750);
        assert_eq!(usage.used_percent, 25.0);
        assert_eq!(usage.file_count, 3);
    }

    #[test]
    fn test_usage_of_overshoot_saturates() {
        // An overshot ledger (accepted admission race) still reports sanely.
        let usage = usage_of(&ledger(1200, 1000));
        assert_eq!(usage.available_bytes, 0);
        assert!(usage.used_percent > 100.0);
    }

    #[test]
    fn test_quota_delta_signs() {
        let c = QuotaDelta::commit(42);
        assert_eq!((c.bytes, c.files), (42, 1));
        let r = QuotaDelta::release(42);
        assert_eq!((r.bytes, r.files), (-42, -1));
    }
}
