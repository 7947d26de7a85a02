//! Bounded retry for transient blob I/O failures.
//!
//! Only `put`/`get` style calls go through this wrapper, and only for
//! errors classified transient; quota and token-state errors are handled
//! upstream and never retried.

use crate::traits::{StorageError, StorageResult};
use std::future::Future;
use std::time::Duration;

/// Cap on the per-attempt backoff so high attempt counts do not produce
/// excessively long delays.
pub const MAX_RETRY_BACKOFF_MS: u64 = 2_000;

/// Backoff in milliseconds for a given attempt (exponential with cap).
#[inline]
pub(crate) fn compute_retry_backoff_ms(attempt: u32) -> u64 {
    (100u64.saturating_mul(2u64.saturating_pow(attempt))).min(MAX_RETRY_BACKOFF_MS)
}

/// Run `op` up to `attempts` times, backing off between transient failures.
///
/// Non-transient errors (absent blob, invalid key, config) return
/// immediately.
pub async fn with_retries<T, F, Fut>(op_name: &str, attempts: u32, op: F) -> StorageResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let backoff = compute_retry_backoff_ms(attempt);
                tracing::warn!(
                    error = %err,
                    operation = op_name,
                    attempt = attempt + 1,
                    backoff_ms = backoff,
                    "Transient blob store failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(compute_retry_backoff_ms(0), 100);
        assert_eq!(compute_retry_backoff_ms(1), 200);
        assert_eq!(compute_retry_backoff_ms(10), MAX_RETRY_BACKOFF_MS);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries("put", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StorageError::BackendError("flaky".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: StorageResult<()> = with_retries("get", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::NotFound("missing".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: StorageResult<()> = with_retries("put", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::BackendError("down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(StorageError::BackendError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
