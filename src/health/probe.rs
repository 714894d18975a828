//! One-shot pool probes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::client::{MetricsSnapshot, PoolSet, TransportPool};
use crate::observability::metrics;
use crate::resilience::with_deadline;

/// Result of a health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Pool name → reachable. Pools without a probe URL are absent.
    pub pools: BTreeMap<String, bool>,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.pools.values().all(|healthy| *healthy)
    }
}

/// Probe every pool that has a `health_url`, concurrently.
pub async fn probe_pools(pools: &PoolSet, timeout_ms: u64) -> BTreeMap<String, bool> {
    let timeout = Duration::from_millis(timeout_ms);
    let probes = pools.iter().filter_map(|pool| {
        let url = pool.config().health_url.as_deref()?;
        Some(async move { (pool.name().to_string(), probe(pool, url, timeout).await) })
    });

    let results = futures_util::future::join_all(probes).await;
    for (pool, healthy) in &results {
        metrics::record_pool_health(pool, *healthy);
    }
    results.into_iter().collect()
}

async fn probe(pool: &TransportPool, url: &str, timeout: Duration) -> bool {
    let call = pool
        .client()
        .get(url)
        .header("user-agent", "upstream-guard-health-check")
        .send();

    match with_deadline(timeout, call).await {
        Ok(Ok(response)) => {
            let success = response.status().is_success();
            if !success {
                tracing::warn!(pool = %pool.name(), status = %response.status(), "Health check failed: non-success status");
            }
            success
        }
        Ok(Err(e)) => {
            tracing::warn!(pool = %pool.name(), error = %e, "Health check failed: connection error");
            false
        }
        Err(_) => {
            tracing::warn!(pool = %pool.name(), "Health check failed: timeout");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientMetrics;
    use crate::config::{ClientConfig, PoolConfig};

    #[test]
    fn test_all_healthy() {
        let mut pools = BTreeMap::new();
        pools.insert("calendar".to_string(), true);
        let mut report = HealthReport {
            pools,
            metrics: ClientMetrics::new(10).snapshot(),
        };
        assert!(report.all_healthy());

        report.pools.insert("identity".to_string(), false);
        assert!(!report.all_healthy());
    }

    #[tokio::test]
    async fn test_unreachable_pool_is_unhealthy() {
        let config = ClientConfig {
            pools: vec![PoolConfig {
                name: "dead".into(),
                hosts: vec!["dead.invalid".into()],
                // Port 9 on loopback refuses connections.
                health_url: Some("http://127.0.0.1:9/health".into()),
                use_system_proxy: false,
                ..PoolConfig::default()
            }],
            ..ClientConfig::default()
        };
        let pools = PoolSet::from_config(&config).unwrap();

        let results = probe_pools(&pools, 1000).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results.get("dead"), Some(&false));
    }
}
