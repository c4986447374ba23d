//! Bounded retry for store round-trips.

use crate::config::RetryPolicy;
use crate::store::{StoreError, StoreResult};
use std::future::Future;

/// Runs `op` until it succeeds, fails with a non-transient error, or the policy's attempts are
/// used up. Only [`StoreError::Unavailable`] is retried; the last error is returned on
/// exhaustion.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    id: &str,
    mut op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < policy.max_attempts() => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation,
                    id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient store failure, retrying: {}",
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err @ StoreError::Unavailable(_)) => {
                tracing::warn!(operation, id, attempt, "store still unavailable, giving up");
                return Err(err);
            }
            other => return other,
        }
    }
}
