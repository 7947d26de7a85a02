//! Download token repository.
//!
//! Redemption is a single conditional UPDATE…RETURNING: the expiry and
//! use-count checks happen inside the same statement as the increment, so
//! two concurrent redeemers of a one-use token cannot both pass.

use chrono::{DateTime, Utc};
use depot_core::models::DownloadToken;
use depot_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::traits::{RedeemOutcome, TokenStore};
use async_trait::async_trait;

/// Row type for the download_tokens table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    file_id: Uuid,
    issued_to: Uuid,
    secret: String,
    expires_at: DateTime<Utc>,
    max_uses: i32,
    use_count: i32,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl TokenRow {
    fn into_token(self) -> DownloadToken {
        DownloadToken {
            id: self.id,
            file_id: self.file_id,
            issued_to: self.issued_to,
            secret: self.secret,
            expires_at: self.expires_at,
            max_uses: self.max_uses.max(0) as u32,
            use_count: self.use_count.max(0) as u32,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

const TOKEN_COLUMNS: &str =
    "id, file_id, issued_to, secret, expires_at, max_uses, use_count, created_at, last_used_at";

/// Repository for the download_tokens table.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    #[tracing::instrument(skip(self, token), fields(db.table = "download_tokens", file_id = %token.file_id))]
    async fn insert(&self, token: DownloadToken) -> Result<DownloadToken, AppError> {
        let row: TokenRow = sqlx::query_as::<Postgres, TokenRow>(&format!(
            r#"
            INSERT INTO download_tokens (
                id, file_id, issued_to, secret, expires_at, max_uses, use_count, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(token.id)
        .bind(token.file_id)
        .bind(token.issued_to)
        .bind(&token.secret)
        .bind(token.expires_at)
        .bind(token.max_uses as i32)
        .bind(token.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_token())
    }

    #[tracing::instrument(skip_all, fields(db.table = "download_tokens"))]
    async fn get_by_secret(&self, secret: &str) -> Result<Option<DownloadToken>, AppError> {
        let row: Option<TokenRow> = sqlx::query_as::<Postgres, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM download_tokens WHERE secret = $1"
        ))
        .bind(secret)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(TokenRow::into_token))
    }

    #[tracing::instrument(skip_all, fields(db.table = "download_tokens"))]
    async fn redeem(&self, secret: &str, now: DateTime<Utc>) -> Result<RedeemOutcome, AppError> {
        let row: Option<TokenRow> = sqlx::query_as::<Postgres, TokenRow>(&format!(
            r#"
            UPDATE download_tokens
            SET use_count = use_count + 1, last_used_at = $2
            WHERE secret = $1 AND expires_at >= $2 AND use_count < max_uses
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(secret)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(RedeemOutcome::Redeemed(row.into_token()));
        }

        // The consume failed; a plain read classifies why.
        match self.get_by_secret(secret).await? {
            None => Ok(RedeemOutcome::NotFound),
            Some(token) if token.is_expired(now) => Ok(RedeemOutcome::Expired),
            Some(_) => Ok(RedeemOutcome::Exhausted),
        }
    }

    #[tracing::instrument(skip(self), fields(db.table = "download_tokens"))]
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM download_tokens WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
