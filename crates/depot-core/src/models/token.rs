use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time- and count-limited download grant, bound to exactly one file at
/// issue time. `use_count` only moves through the store's atomic consume;
/// nothing else mutates an issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadToken {
    pub id: Uuid,
    pub file_id: Uuid,
    pub issued_to: Uuid,
    pub secret: String,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
    pub use_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl DownloadToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.use_count >= self.max_uses
    }

    pub fn remaining_uses(&self) -> u32 {
        self.max_uses.saturating_sub(self.use_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires_at: DateTime<Utc>, max_uses: u32, use_count: u32) -> DownloadToken {
        DownloadToken {
            id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            issued_to: Uuid::new_v4(),
            secret: "s".repeat(48),
            expires_at,
            max_uses,
            use_count,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        assert!(token(now - Duration::seconds(1), 1, 0).is_expired(now));
        assert!(!token(now + Duration::seconds(1), 1, 0).is_expired(now));
        // Exactly at the boundary the token is still usable.
        assert!(!token(now, 1, 0).is_expired(now));
    }

    #[test]
    fn test_exhaustion_and_remaining() {
        let t = token(Utc::now() + Duration::hours(1), 3, 2);
        assert!(!t.is_exhausted());
        assert_eq!(t.remaining_uses(), 1);

        let spent = token(Utc::now() + Duration::hours(1), 3, 3);
        assert!(spent.is_exhausted());
        assert_eq!(spent.remaining_uses(), 0);
    }
}
