//! Download token issuer and redeemer.
//!
//! Secrets are fixed-length alphanumeric strings drawn from the thread RNG
//! (CSPRNG-backed, periodically reseeded from OS entropy). Redemption is a
//! single atomic consume in the token store; the engine only classifies and
//! resolves the target file afterwards.

use std::sync::Arc;

use chrono::{Duration, Utc};
use depot_core::models::{DownloadToken, StoredFile};
use depot_core::{AppError, EngineConfig};
use depot_db::{FileStore, RedeemOutcome, TokenStore};
use depot_storage::{BlobByteStream, BlobStore};
use rand::distr::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

/// A successful redemption: the consumed token state, the target file, and
/// a presigned URL for streaming the bytes.
#[derive(Debug, Clone)]
pub struct RedeemedDownload {
    pub token: DownloadToken,
    pub file: StoredFile,
    pub download_url: String,
}

fn generate_secret(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct DownloadTokenService {
    tokens: Arc<dyn TokenStore>,
    files: Arc<dyn FileStore>,
    blobs: Arc<dyn BlobStore>,
    config: EngineConfig,
}

impl DownloadTokenService {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        files: Arc<dyn FileStore>,
        blobs: Arc<dyn BlobStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tokens,
            files,
            blobs,
            config,
        }
    }

    /// Mint a token bound to one file. The binding never changes; a token
    /// is unusable for any other file.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id, file_id = %file_id))]
    pub async fn issue(
        &self,
        tenant_id: Uuid,
        file_id: Uuid,
        issued_to: Uuid,
        max_uses: Option<u32>,
        ttl: Option<Duration>,
    ) -> Result<DownloadToken, AppError> {
        let file = self
            .files
            .get_by_id(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file {} not found", file_id)))?;
        if file.tenant_id != tenant_id {
            return Err(AppError::Forbidden(
                "file belongs to a different tenant".to_string(),
            ));
        }
        if file.is_tombstoned() {
            return Err(AppError::NotFound(format!("file {} not found", file_id)));
        }

        let max_uses = max_uses.unwrap_or(self.config.token_default_max_uses);
        if max_uses == 0 {
            return Err(AppError::InvalidInput(
                "max_uses must be at least 1".to_string(),
            ));
        }
        let ttl = ttl.unwrap_or_else(|| Duration::seconds(self.config.token_default_ttl_secs));

        let now = Utc::now();
        let token = DownloadToken {
            id: Uuid::new_v4(),
            file_id,
            issued_to,
            secret: generate_secret(self.config.token_secret_len),
            expires_at: now + ttl,
            max_uses,
            use_count: 0,
            created_at: now,
            last_used_at: None,
        };

        let token = self.tokens.insert(token).await?;
        tracing::info!(
            token_id = %token.id,
            file_id = %file_id,
            max_uses = token.max_uses,
            expires_at = %token.expires_at,
            "Download token issued"
        );
        Ok(token)
    }

    /// Consume one use of a token and resolve its file for streaming.
    ///
    /// The three rejection kinds stay distinguishable so callers can show
    /// "expired" vs "used up" vs "invalid". None of them is retried.
    #[tracing::instrument(skip_all)]
    pub async fn redeem(&self, secret: &str) -> Result<RedeemedDownload, AppError> {
        let now = Utc::now();
        let token = match self.tokens.redeem(secret, now).await? {
            RedeemOutcome::Redeemed(token) => token,
            RedeemOutcome::NotFound => return Err(AppError::TokenNotFound),
            RedeemOutcome::Expired => return Err(AppError::TokenExpired),
            RedeemOutcome::Exhausted => return Err(AppError::TokenExhausted),
        };

        let file = self
            .files
            .get_by_id(token.file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file {} not found", token.file_id)))?;
        // The token row stays resolvable for audit, but tombstoned content
        // is not downloadable.
        if file.is_tombstoned() {
            return Err(AppError::NotFound(format!(
                "file {} not found",
                token.file_id
            )));
        }

        // Sign for the remaining token validity, bounded to sane values.
        let sign_ttl = (token.expires_at - now)
            .num_seconds()
            .clamp(60, 3600) as u64;
        let download_url = self
            .blobs
            .sign(&file.storage_key, std::time::Duration::from_secs(sign_ttl))
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        tracing::info!(
            token_id = %token.id,
            file_id = %file.id,
            use_count = token.use_count,
            max_uses = token.max_uses,
            "Download token redeemed"
        );

        Ok(RedeemedDownload {
            token,
            file,
            download_url,
        })
    }

    /// Open the redeemed file as a byte stream through the blob store.
    pub async fn open_stream(&self, file: &StoredFile) -> Result<BlobByteStream, AppError> {
        self.blobs
            .get_stream(&file.storage_key)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_shape() {
        let secret = generate_secret(48);
        assert_eq!(secret.len(), 48);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));

        // Two draws colliding would mean the RNG is broken.
        assert_ne!(generate_secret(48), generate_secret(48));
    }
}
