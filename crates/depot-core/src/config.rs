//! Configuration module
//!
//! Engine configuration loaded from environment variables with sensible
//! defaults, so the engine can boot with nothing but a `DATABASE_URL`
//! (and not even that when running on the in-memory stores).

use std::env;

use crate::models::BASE_QUOTA_BYTES;

const DEFAULT_STALE_UPLOAD_WINDOW_SECS: u64 = 24 * 60 * 60;
const DEFAULT_BLOB_PUT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BLOB_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_TOKEN_SECRET_LEN: usize = 48;
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;
const DEFAULT_TOKEN_MAX_USES: u32 = 1;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_TOMBSTONE_BLOB_RETENTION_DAYS: i64 = 30;
const MIN_TOKEN_SECRET_LEN: usize = 32;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub database_url: Option<String>,
    /// No progress update within this window fails an UPLOADING row.
    pub stale_upload_window_secs: u64,
    /// Upper bound on a single blob-store put.
    pub blob_put_timeout_secs: u64,
    /// Bounded retries for transient blob I/O failures.
    pub blob_retry_attempts: u32,
    pub token_secret_len: usize,
    pub token_default_ttl_secs: i64,
    pub token_default_max_uses: u32,
    pub base_quota_bytes: u64,
    pub cleanup_interval_secs: u64,
    /// Blobs of tombstoned files older than this are deleted by the sweep.
    pub tombstone_blob_retention_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            stale_upload_window_secs: DEFAULT_STALE_UPLOAD_WINDOW_SECS,
            blob_put_timeout_secs: DEFAULT_BLOB_PUT_TIMEOUT_SECS,
            blob_retry_attempts: DEFAULT_BLOB_RETRY_ATTEMPTS,
            token_secret_len: DEFAULT_TOKEN_SECRET_LEN,
            token_default_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            token_default_max_uses: DEFAULT_TOKEN_MAX_USES,
            base_quota_bytes: BASE_QUOTA_BYTES,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            tombstone_blob_retention_days: DEFAULT_TOMBSTONE_BLOB_RETENTION_DAYS,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: env::var("DATABASE_URL").ok(),
            stale_upload_window_secs: env_parse(
                "STALE_UPLOAD_WINDOW_SECS",
                DEFAULT_STALE_UPLOAD_WINDOW_SECS,
            ),
            blob_put_timeout_secs: env_parse("BLOB_PUT_TIMEOUT_SECS", DEFAULT_BLOB_PUT_TIMEOUT_SECS),
            blob_retry_attempts: env_parse("BLOB_RETRY_ATTEMPTS", DEFAULT_BLOB_RETRY_ATTEMPTS),
            token_secret_len: env_parse("TOKEN_SECRET_LEN", DEFAULT_TOKEN_SECRET_LEN),
            token_default_ttl_secs: env_parse("TOKEN_DEFAULT_TTL_SECS", DEFAULT_TOKEN_TTL_SECS),
            token_default_max_uses: env_parse("TOKEN_DEFAULT_MAX_USES", DEFAULT_TOKEN_MAX_USES),
            base_quota_bytes: env_parse("BASE_QUOTA_BYTES", BASE_QUOTA_BYTES),
            cleanup_interval_secs: env_parse(
                "CLEANUP_INTERVAL_SECS",
                DEFAULT_CLEANUP_INTERVAL_SECS,
            ),
            tombstone_blob_retention_days: env_parse(
                "TOMBSTONE_BLOB_RETENTION_DAYS",
                DEFAULT_TOMBSTONE_BLOB_RETENTION_DAYS,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.token_secret_len < MIN_TOKEN_SECRET_LEN {
            anyhow::bail!(
                "TOKEN_SECRET_LEN must be at least {} (got {})",
                MIN_TOKEN_SECRET_LEN,
                self.token_secret_len
            );
        }
        if self.stale_upload_window_secs == 0 {
            anyhow::bail!("STALE_UPLOAD_WINDOW_SECS must be positive");
        }
        if self.blob_put_timeout_secs == 0 {
            anyhow::bail!("BLOB_PUT_TIMEOUT_SECS must be positive");
        }
        if self.token_default_max_uses == 0 {
            anyhow::bail!("TOKEN_DEFAULT_MAX_USES must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_quota_bytes, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.stale_upload_window_secs, 86_400);
    }

    #[test]
    fn test_short_token_secret_rejected() {
        let config = EngineConfig {
            token_secret_len: 16,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_uses_rejected() {
        let config = EngineConfig {
            token_default_max_uses: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
