//! Retry logic with exponential backoff
//!
//! Segment workers route every download attempt through
//! [`download_with_retry`], which re-runs the operation on retryable errors
//! with exponentially growing, optionally jittered delays. The backoff sleep
//! races against a cancellation token so an aborting run does not wait out
//! pending delays.

use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection reset, refused partial content, timeouts)
/// should return `true`. Permanent failures (cancellation, disk full) should
/// return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation is attempted once, then retried up to `config.max_attempts`
/// times while it keeps failing with a retryable error. A cancellation fired
/// during a backoff delay aborts the wait and returns the last error.
///
/// Returns the successful result, or the last error once the budget is
/// exhausted or a non-retryable error occurs.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::select! {
                    _ = tokio::time::sleep(jittered_delay) => {}
                    _ = cancel.cancelled() => {
                        tracing::debug!("Retry wait interrupted by cancellation");
                        return Err(e);
                    }
                }

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
