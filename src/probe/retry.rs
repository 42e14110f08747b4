//! Bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

use super::ProbeResult;

const BASE_BACKOFF_MS: u64 = 100;

/// Delay after the given zero-based attempt: 100ms, 200ms, 400ms, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor))
}

/// Run `attempt_fn` up to `retries + 1` times.
///
/// Stops at the first error-free successful result. The returned result's
/// `attempt` is the index of the attempt that produced it.
pub async fn run_with_retries<F, Fut>(retries: u32, mut attempt_fn: F) -> ProbeResult
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ProbeResult>,
{
    let mut attempt = 0;
    loop {
        let mut result = attempt_fn(attempt).await;
        result.attempt = attempt;

        if result.error.is_none() && result.success {
            return result;
        }
        if attempt >= retries {
            return result;
        }

        let delay = backoff_delay(attempt);
        tracing::debug!(
            "Attempt {} for {} failed, retrying in {:?}",
            attempt,
            result.target,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
