//! Error types module
//!
//! This module provides the core error types used throughout the Depot engine.
//! All errors are unified under the `AppError` enum which can represent database,
//! blob-store, quota, session, and token errors.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.
//! With `default-features = false`, build without the `sqlx` feature; then `AppError`
//! carries database errors as plain strings.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like lookups of absent rows
    Debug,
    /// Warning level - for recoverable issues like quota limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented.
/// This trait allows errors to self-describe their boundary characteristics
/// without the engine knowing anything about the transport in front of it.
pub trait ErrorMetadata {
    /// HTTP status code hint for the boundary layer
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "QUOTA_EXCEEDED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is transient (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Blob store error: {0}")]
    Storage(String),

    #[error("Quota exceeded: {used} of {limit} bytes used, {requested} bytes requested")]
    QuotaExceeded {
        used: u64,
        limit: u64,
        requested: u64,
    },

    #[error("Session not active: {0}")]
    SessionNotActive(String),

    #[error("Download token not found")]
    TokenNotFound,

    #[error("Download token expired")]
    TokenExpired,

    #[error("Download token exhausted")]
    TokenExhausted,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, log_level).
/// Reduces duplication in the ErrorMetadata impl; client_message stays per-variant
/// for dynamic content.
fn app_error_static_metadata(err: &AppError) -> (u16, &'static str, bool, LogLevel) {
    match err {
        AppError::Database(_) => (500, "DATABASE_ERROR", true, LogLevel::Error),
        AppError::Storage(_) => (500, "STORAGE_ERROR", true, LogLevel::Error),
        AppError::QuotaExceeded { .. } => (413, "QUOTA_EXCEEDED", false, LogLevel::Warn),
        AppError::SessionNotActive(_) => (409, "SESSION_NOT_ACTIVE", false, LogLevel::Debug),
        AppError::TokenNotFound => (404, "TOKEN_NOT_FOUND", false, LogLevel::Debug),
        AppError::TokenExpired => (410, "TOKEN_EXPIRED", false, LogLevel::Debug),
        AppError::TokenExhausted => (410, "TOKEN_EXHAUSTED", false, LogLevel::Debug),
        AppError::NotFound(_) => (404, "NOT_FOUND", false, LogLevel::Debug),
        AppError::Forbidden(_) => (403, "FORBIDDEN", false, LogLevel::Warn),
        AppError::InvalidInput(_) => (400, "INVALID_INPUT", false, LogLevel::Debug),
        AppError::Internal(_) => (500, "INTERNAL_ERROR", true, LogLevel::Error),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::QuotaExceeded { .. } => "QuotaExceeded",
            AppError::SessionNotActive(_) => "SessionNotActive",
            AppError::TokenNotFound => "TokenNotFound",
            AppError::TokenExpired => "TokenExpired",
            AppError::TokenExhausted => "TokenExhausted",
            AppError::NotFound(_) => "NotFound",
            AppError::Forbidden(_) => "Forbidden",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Internal(_) => "Internal",
        }
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).3
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) => "Failed to access file storage".to_string(),
            AppError::QuotaExceeded {
                used,
                limit,
                requested,
            } => {
                format!(
                    "Storage quota exceeded: {} of {} bytes used, {} bytes requested",
                    used, limit, requested
                )
            }
            AppError::SessionNotActive(ref msg) => msg.clone(),
            AppError::TokenNotFound => "Download token is invalid".to_string(),
            AppError::TokenExpired => "Download token has expired".to_string(),
            AppError::TokenExhausted => "Download token has no remaining uses".to_string(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Forbidden(ref msg) => msg.clone(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_error_metadata_quota_exceeded() {
        let err = AppError::QuotaExceeded {
            used: 100,
            limit: 150,
            requested: 75,
        };
        assert_eq!(err.http_status_code(), 413);
        assert_eq!(err.error_code(), "QUOTA_EXCEEDED");
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains("100"));
        assert!(err.client_message().contains("150"));
        assert!(err.client_message().contains("75"));
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_error_metadata_token_variants_distinguishable() {
        assert_eq!(AppError::TokenNotFound.error_code(), "TOKEN_NOT_FOUND");
        assert_eq!(AppError::TokenExpired.error_code(), "TOKEN_EXPIRED");
        assert_eq!(AppError::TokenExhausted.error_code(), "TOKEN_EXHAUSTED");
        assert_eq!(AppError::TokenNotFound.http_status_code(), 404);
        assert_eq!(AppError::TokenExpired.http_status_code(), 410);
        assert_eq!(AppError::TokenExhausted.http_status_code(), 410);
    }

    #[test]
    fn test_error_metadata_session_not_active() {
        let err = AppError::SessionNotActive("session is cancelled".to_string());
        assert_eq!(err.http_status_code(), 409);
        assert_eq!(err.error_code(), "SESSION_NOT_ACTIVE");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "session is cancelled");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }
}
