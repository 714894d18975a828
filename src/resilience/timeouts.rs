//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap a future with a deadline
//! - Keep timeout errors distinct from other errors
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Transport pools carry their own per-call timeout; this wrapper is for
//!   calls that need a tighter bound (health probes)

use std::future::Future;
use std::time::Duration;

/// The wrapped future did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Await `fut`, giving up after `limit`.
pub async fn with_deadline<F: Future>(limit: Duration, fut: F) -> Result<F::Output, TimedOut> {
    tokio::time::timeout(limit, fut).await.map_err(|_| TimedOut(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let slow = tokio::time::sleep(Duration::from_secs(10));
        let result = with_deadline(Duration::from_millis(50), slow).await;
        assert_eq!(result, Err(TimedOut(Duration::from_millis(50))));
    }

    #[tokio::test]
    async fn test_fast_future_passes_through() {
        let result = with_deadline(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result, Ok(42));
    }
}
