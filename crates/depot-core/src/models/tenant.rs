use serde::{Deserialize, Serialize};

/// Base unit for plan-derived storage limits: 5 GiB.
pub const BASE_QUOTA_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Subscription tier. The tenant directory (external) resolves a tenant to
/// its tier; the tier resolves the storage limit. Changing tier rewrites
/// `limit_bytes` on the ledger without touching the usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Basic,
    Business,
    Enterprise,
}

impl PlanTier {
    /// Multiplier applied to the base quota unit for this tier.
    pub fn multiplier(&self) -> u64 {
        match self {
            PlanTier::Basic => 1,
            PlanTier::Business => 100,
            PlanTier::Enterprise => 1024,
        }
    }

    /// Storage limit for this tier, as a multiple of [`BASE_QUOTA_BYTES`].
    pub fn limit_bytes(&self) -> u64 {
        self.multiplier() * BASE_QUOTA_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_tier_limits() {
        assert_eq!(PlanTier::Basic.limit_bytes(), 5 * 1024 * 1024 * 1024);
        assert_eq!(
            PlanTier::Business.limit_bytes(),
            100 * PlanTier::Basic.limit_bytes()
        );
        assert_eq!(
            PlanTier::Enterprise.limit_bytes(),
            1024 * PlanTier::Basic.limit_bytes()
        );
    }
}
