use std::future::Future;

use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::error::RagError;

pub const MAX_ATTEMPTS: usize = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 4_000;

/// Runs `op` up to [`MAX_ATTEMPTS`] times with doubling backoff
/// (500 ms, 1 s, … capped at 4 s) as long as the failure classifies as
/// retryable; anything else surfaces immediately.
pub async fn with_backoff<T, F, Fut>(label: &str, mut op: F) -> Result<T, RagError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RagError>>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!(
                    attempt,
                    label,
                    error = %err,
                    "transient failure; backing off before retrying"
                );
                sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }
    Err(RagError::Internal(format!(
        "retry loop for `{label}` exited without a result"
    )))
}
