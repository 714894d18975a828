//! TTL cache store.
//!
//! # Responsibilities
//! - Keep serialized values with a per-entry TTL
//! - Treat logically expired entries as absent before the sweeper removes them
//! - Count hits and misses
//! - Remove entries by key, by owning entity or by substring
//! - Coalesce concurrent misses for one key

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::key::{contains_token, in_entity_scope};
use crate::cache::types::{CacheError, CacheStats};
use crate::config::CacheConfig;
use crate::observability::metrics;

/// Default entry lifetime when `set` is given no TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
    size: usize,
}

impl Entry {
    /// Still valid at exactly `ttl`; expired strictly after.
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

/// In-memory keyed store with per-entry TTL.
#[derive(Debug)]
pub struct CacheManager {
    entries: DashMap<String, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
    default_ttl: Duration,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl CacheManager {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            default_ttl,
            in_flight: DashMap::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_millis(config.default_ttl_ms))
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Serialize and store `value`, replacing any previous entry.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError> {
        let value = serde_json::to_value(value).map_err(|source| CacheError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.set_raw(key, value, ttl);
        Ok(())
    }

    pub fn set_raw(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let size = key.len() + value.to_string().len();
        let entry = Entry {
            value,
            inserted_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
            size,
        };
        self.entries.insert(key.to_string(), entry);
        metrics::record_cache_size(self.entries.len());
    }

    /// Typed read. A value that no longer matches `T` is logged and counted as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let decoded = self.lookup(key).and_then(|value| decode(key, value));
        self.count_lookup(decoded.is_some());
        decoded
    }

    /// Read and count a hit or miss.
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        let found = self.lookup(key);
        self.count_lookup(found.is_some());
        found
    }

    fn count_lookup(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(hit);
    }

    /// Read without touching hit/miss counters. Expired entries are removed.
    fn lookup(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            // Re-check under the write lock; a fresh `set` may have raced us.
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }

    /// Whether a live entry exists. Does not affect statistics.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries.get(key).is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        metrics::record_cache_size(0);
        tracing::info!(entries = count, "Cache cleared");
    }

    /// Stored entries, including expired ones the sweeper has not reached yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let (size, memory_usage) = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .fold((0, 0), |(count, bytes), entry| (count + 1, bytes + entry.size));
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 };

        CacheStats {
            size,
            hits,
            misses,
            hit_rate,
            memory_usage,
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Remove `user*` keys and route keys that mention the user id as a token.
    pub fn invalidate_user_data(&self, user_id: &str) -> usize {
        self.invalidate_entity("user", user_id)
    }

    /// Remove `agent*` keys and route keys that mention the agent id as a token.
    pub fn invalidate_agent_data(&self, agent_id: &str) -> usize {
        self.invalidate_entity("agent", agent_id)
    }

    fn invalidate_entity(&self, kind: &str, id: &str) -> usize {
        let removed = self.remove_where(|key| in_entity_scope(key, kind) && contains_token(key, id));
        tracing::debug!(kind, id, removed, "Invalidated entity cache entries");
        removed
    }

    /// Remove every key containing `pattern` as a substring. An empty pattern removes nothing.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        if pattern.is_empty() {
            tracing::warn!("Ignoring empty invalidation pattern");
            return 0;
        }
        let removed = self.remove_where(|key| key.contains(pattern));
        tracing::debug!(pattern, removed, "Invalidated cache entries by pattern");
        removed
    }

    fn remove_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let hit = matches(key.as_str());
            if hit {
                removed += 1;
            }
            !hit
        });
        if removed > 0 {
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    /// Drop all logically expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired(now);
            if expired {
                removed += 1;
            }
            !expired
        });
        metrics::record_cache_size(self.entries.len());
        removed
    }

    /// Periodically purge expired entries until shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    /// Return the cached value, or run `compute` and cache its success.
    ///
    /// Concurrent callers missing on the same key wait for the first one
    /// instead of computing again. Errors are returned and not cached.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let _flight = self.single_flight(key).await;
        if let Some(value) = self.lookup(key).and_then(|v| decode(key, v)) {
            return Ok(value);
        }

        let value = compute().await?;
        if let Err(e) = self.set(key, &value, ttl) {
            tracing::warn!(error = %e, "Computed value not cached");
        }
        Ok(value)
    }

    /// Wait for exclusive right to fill `key`.
    async fn single_flight(&self, key: &str) -> FlightGuard<'_> {
        let lock = self.in_flight.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        FlightGuard {
            cache: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Read a live entry without counting it.
    pub(crate) fn peek(&self, key: &str) -> Option<Value> {
        self.lookup(key)
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(key, error = %e, "Cached value has unexpected shape");
            None
        }
    }
}

/// Held while one caller fills a key. Releases waiters on drop.
struct FlightGuard<'a> {
    cache: &'a CacheManager,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left means nobody is waiting.
        self.cache
            .in_flight
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
