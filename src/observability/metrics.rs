//! Metrics collection and exposition.
//!
//! # Metrics
//! - `upstream_guard_requests_total` (counter): attempts by dependency, outcome
//! - `upstream_guard_request_duration_seconds` (histogram): attempt latency
//! - `upstream_guard_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `upstream_guard_cache_lookups_total` (counter): hits and misses
//! - `upstream_guard_cache_entries` (gauge): live cache entries
//! - `upstream_guard_pool_healthy` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed
//! - Labels for dependency, pool and outcome only (bounded cardinality)

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(dependency: &str, success: bool, latency: Duration) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "upstream_guard_requests_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "upstream_guard_request_duration_seconds",
        "dependency" => dependency.to_string()
    )
    .record(latency.as_secs_f64());
}

pub fn record_breaker_state(dependency: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!("upstream_guard_breaker_state", "dependency" => dependency.to_string()).set(value);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("upstream_guard_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    metrics::gauge!("upstream_guard_cache_entries").set(entries as f64);
}

pub fn record_pool_health(pool: &str, healthy: bool) {
    metrics::gauge!("upstream_guard_pool_healthy", "pool" => pool.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
