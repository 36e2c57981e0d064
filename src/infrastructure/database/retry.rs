//! Bounded retry for transient store failures.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;

use crate::domain::error::StoreError;

/// Maximum retries applied to a transient store failure before giving up.
const MAX_RETRIES: u32 = 3;

/// Run a store operation, retrying transient failures up to three times with
/// exponential backoff. Permanent failures surface immediately.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_multiplier(2.0)
        .with_max_interval(Duration::from_secs(2))
        .build();

    let mut attempts = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempts < MAX_RETRIES => {
                attempts += 1;
                let delay = policy
                    .next_backoff()
                    .unwrap_or_else(|| Duration::from_millis(400));
                tracing::warn!(
                    op = op_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient store failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
