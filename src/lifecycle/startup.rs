//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build breakers, client and cache in dependency order
//! - Install the metrics exporter when enabled
//! - Start background tasks (cache sweeper, health monitor)
//!
//! # Design Decisions
//! - Fail fast: any startup error is returned, nothing is half-built
//! - Every instance is constructed here and shared by `Arc`; there are no globals

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;

use crate::admin::{self, AdminState};
use crate::cache::{CacheManager, RouteCache};
use crate::client::{ClientError, ResilientClient};
use crate::config::{validate_config, ConfigError, GuardConfig};
use crate::health::HealthMonitor;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::resilience::BreakerRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build client: {0}")]
    Client(#[from] ClientError),
    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// The composition root: every shared instance of the layer.
pub struct Components {
    pub config: GuardConfig,
    pub breakers: Arc<BreakerRegistry>,
    pub client: Arc<ResilientClient>,
    pub cache: Arc<CacheManager>,
}

impl Components {
    /// Validate `config` and build every subsystem. Does not spawn tasks.
    pub fn build(config: GuardConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let client = Arc::new(ResilientClient::new(config.client.clone(), breakers.clone())?);
        let cache = Arc::new(CacheManager::from_config(&config.cache));

        tracing::info!(
            pools = client.pools().iter().count(),
            retries = config.client.retries,
            default_ttl_ms = config.cache.default_ttl_ms,
            "Components initialized"
        );

        Ok(Self {
            config,
            breakers,
            client,
            cache,
        })
    }

    /// Install the Prometheus exporter if enabled. Call once per process.
    pub fn install_metrics(&self) -> Result<(), StartupError> {
        let observability = &self.config.observability;
        if !observability.metrics_enabled {
            return Ok(());
        }
        let addr: SocketAddr = observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
        Ok(())
    }

    /// Start the cache sweeper and the health monitor. Both stop on `shutdown`.
    pub fn spawn_background(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let sweep = Duration::from_millis(self.config.cache.sweep_interval_ms);
        let sweeper = self.cache.spawn_sweeper(sweep, shutdown.subscribe());

        let monitor = HealthMonitor::new(self.client.clone());
        let health = tokio::spawn(monitor.run(shutdown.subscribe()));

        vec![sweeper, health]
    }

    /// Middleware state for caching read routes of the host application.
    pub fn route_cache(&self) -> RouteCache {
        RouteCache::new(self.cache.clone(), &self.config.cache)
    }

    pub fn admin_router(&self) -> Router {
        let state = AdminState::new(self.client.clone(), self.cache.clone(), &self.config.admin);
        admin::router(state, Duration::from_secs(self.config.admin.request_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = GuardConfig::default();
        config.breaker.defaults.failure_threshold = 0;
        let err = Components::build(config).err().unwrap();
        assert!(matches!(err, StartupError::Config(ConfigError::Validation(_))));
    }

    #[test]
    fn test_components_share_the_registry() {
        let mut config = GuardConfig::default();
        config.client.pools.push(PoolConfig {
            name: "calendar".into(),
            hosts: vec!["www.googleapis.com".into()],
            ..PoolConfig::default()
        });
        let components = Components::build(config).unwrap();

        components.breakers.get_or_create("calendar");
        assert!(components.client.breakers().get("calendar").is_some());
        assert_eq!(components.client.pools().iter().count(), 2);
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_shutdown() {
        let components = Components::build(GuardConfig::default()).unwrap();
        let shutdown = Shutdown::new();
        let handles = components.spawn_background(&shutdown);

        shutdown.trigger();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
