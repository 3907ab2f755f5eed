//! Bounded retry with linear backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run `op`, retrying up to `max_retries` more times.
///
/// Attempt `n` (1-based) that fails waits `base_delay * n` before the next
/// try. The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(mut op: F, max_retries: u32, base_delay: Duration) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                debug!(attempt, max_retries, "retrying after error: {e}");
                tokio::time::sleep(base_delay * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}
