//! Retry logic.
//!
//! # Responsibilities
//! - Decide per error whether another attempt is worthwhile
//! - Execute retries with exponential backoff + jitter
//! - Return the last observed error once the attempt bound is reached
//!
//! # Design Decisions
//! - Attempts are bounded by `retries + 1`; there is no open-ended retrying
//! - Jittered backoff prevents synchronized retry storms
//! - The classification is supplied by the caller so the loop stays generic

use std::future::Future;

use crate::resilience::backoff::calculate_backoff;

/// Retry parameters for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of the jitter added to each delay in milliseconds.
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay_ms: 1000,
            jitter_max_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Run `operation` until it succeeds, returns a non-retryable error, or the
/// policy's attempt bound is reached. `operation` receives the 0-based attempt
/// number.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.retries || !is_retryable(&err) {
                    if attempt > 0 {
                        tracing::warn!(attempts = attempt + 1, error = %err, "Giving up after retries");
                    }
                    return Err(err);
                }

                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.jitter_max_ms);
                tracing::info!(attempt = attempt + 1, delay = ?delay, error = %err, "Retrying call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
