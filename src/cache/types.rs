//! Cache value and error types.

use serde::Serialize;

/// Counters since the last `reset_stats`, plus live size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Live (unexpired) entries.
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 when there were no lookups.
    pub hit_rate: f64,
    /// Estimated bytes held by live entries (keys plus serialized values).
    pub memory_usage: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to serialize cache value for '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
