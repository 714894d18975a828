//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Name of the catch-all transport pool.
pub const GENERAL_POOL: &str = "general";

/// Root configuration for the resilience and caching layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Circuit breaker defaults and per-dependency overrides.
    pub breaker: BreakerSettings,

    /// Outbound client settings (retries, pools, batching).
    pub client: ClientConfig,

    /// TTL cache and cache middleware settings.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin surface settings.
    pub admin: AdminConfig,
}

/// Circuit breaker thresholds for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures inside the monitoring window that trip the breaker.
    pub failure_threshold: u32,

    /// How long the breaker stays open before admitting a trial call, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Failures older than this are forgotten, in milliseconds.
    pub monitoring_window_ms: u64,

    /// Consecutive half-open successes needed to close again.
    pub success_threshold: u32,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            monitoring_window_ms: 60_000,
            success_threshold: 3,
            half_open_max_calls: 3,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }
}

/// Breaker defaults plus overrides keyed by dependency name.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Applied to every dependency without an override.
    pub defaults: BreakerConfig,

    /// Per-dependency thresholds (e.g. a flaky calendar API).
    pub overrides: HashMap<String, BreakerConfig>,
}

impl BreakerSettings {
    /// Effective config for a dependency.
    pub fn for_dependency(&self, name: &str) -> BreakerConfig {
        self.overrides.get(name).copied().unwrap_or(self.defaults)
    }
}

/// Outbound client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Retries after the initial attempt when a request does not set its own.
    pub retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_delay_ms: u64,

    /// Upper bound of the random jitter added to every backoff, in milliseconds.
    pub jitter_max_ms: u64,

    /// Number of latency samples kept for the moving average.
    pub latency_window: usize,

    /// Maximum calls of one batch in flight at once.
    pub batch_concurrency: usize,

    /// Timeout for a single health probe in milliseconds.
    pub health_timeout_ms: u64,

    /// Interval of the background health monitor in seconds.
    pub health_interval_secs: u64,

    /// Header carrying the per-call correlation id.
    pub correlation_header: String,

    /// Pool used for every host not claimed by `pools`.
    pub general: PoolConfig,

    /// Dedicated pools, one per destination class.
    pub pools: Vec<PoolConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_ms: 1000,
            jitter_max_ms: 1000,
            latency_window: 100,
            batch_concurrency: 16,
            health_timeout_ms: 3000,
            health_interval_secs: 30,
            correlation_header: "x-request-id".to_string(),
            general: PoolConfig::default(),
            pools: Vec::new(),
        }
    }
}

/// Connection pool tuning for one destination class.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool identifier, also the default breaker name for its calls.
    pub name: String,

    /// Hosts routed to this pool (exact match, or `*.suffix`).
    pub hosts: Vec<String>,

    /// Idle keep-alive connections retained per host.
    pub max_idle_per_host: usize,

    /// Idle connections are closed after this many seconds.
    pub idle_timeout_secs: u64,

    /// TCP keep-alive interval in seconds.
    pub tcp_keepalive_secs: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Total per-call timeout in milliseconds.
    pub timeout_ms: u64,

    /// Lightweight endpoint probed by health checks.
    pub health_url: Option<String>,

    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    pub use_system_proxy: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: GENERAL_POOL.to_string(),
            hosts: Vec::new(),
            max_idle_per_host: 32,
            idle_timeout_secs: 90,
            tcp_keepalive_secs: 60,
            connect_timeout_ms: 5_000,
            timeout_ms: 30_000,
            health_url: None,
            use_system_proxy: true,
        }
    }
}

/// TTL cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one, in milliseconds.
    pub default_ttl_ms: u64,

    /// Interval of the expiry sweep in milliseconds.
    pub sweep_interval_ms: u64,

    /// Request header identifying the caller for route cache keys.
    pub identity_header: String,

    /// Responses larger than this are served but never cached.
    pub max_body_bytes: usize,

    /// Coalesce concurrent misses for the same route key.
    pub coalesce_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 5 * 60 * 1000,
            sweep_interval_ms: 30_000,
            identity_header: "x-user-id".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
            coalesce_misses: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Per-request timeout of admin handlers in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = GuardConfig::default();
        assert_eq!(config.breaker.defaults.failure_threshold, 5);
        assert_eq!(config.breaker.defaults.reset_timeout(), Duration::from_secs(30));
        assert_eq!(config.breaker.defaults.monitoring_window(), Duration::from_secs(60));
        assert_eq!(config.client.retries, 3);
        assert_eq!(config.client.retry_delay_ms, 1000);
        assert_eq!(config.client.general.name, GENERAL_POOL);
        assert_eq!(config.cache.default_ttl_ms, 300_000);
    }

    #[test]
    fn test_breaker_override_lookup() {
        let mut settings = BreakerSettings::default();
        settings.overrides.insert(
            "calendar".into(),
            BreakerConfig { failure_threshold: 2, ..BreakerConfig::default() },
        );

        assert_eq!(settings.for_dependency("calendar").failure_threshold, 2);
        assert_eq!(settings.for_dependency("identity").failure_threshold, 5);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GuardConfig = toml::from_str(
            r#"
            [client]
            retries = 1

            [[client.pools]]
            name = "calendar"
            hosts = ["www.googleapis.com"]
            "#,
        )
        .unwrap();

        assert_eq!(config.client.retries, 1);
        assert_eq!(config.client.retry_delay_ms, 1000);
        assert_eq!(config.client.pools[0].timeout_ms, 30_000);
        assert!(config.cache.coalesce_misses);
    }
}
