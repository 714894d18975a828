//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay to wait after failed attempt number `attempt` (0-based):
/// `base_ms * 2^attempt` plus a random jitter in `0..=jitter_max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, jitter_max_ms: u64) -> Duration {
    let exponential_base = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential_base);

    let jitter = if jitter_max_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_max_ms)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter))
}
