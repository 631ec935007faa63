//! Fixed-delay retry for registry writes.

use a3s_mirror_core::config::RetryConfig;
use a3s_mirror_core::error::Result;
use std::future::Future;

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
pub async fn with_retry<T, F, Fut>(retry: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_retryable() => {
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Retrying after transient failure"
                );
                attempt += 1;
                tokio::time::sleep(retry.delay()).await;
            }
            Err(e) => return Err(e),
        }
    }
}
