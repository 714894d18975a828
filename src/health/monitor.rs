//! Periodic health monitoring.
//!
//! # Responsibilities
//! - Probe pools on a fixed interval until shutdown
//! - Log transitions between healthy and unhealthy

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::client::ResilientClient;

pub struct HealthMonitor {
    client: Arc<ResilientClient>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(client: Arc<ResilientClient>) -> Self {
        let interval = Duration::from_secs(client.config().health_interval_secs.max(1));
        Self { client, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let probed = self
            .client
            .pools()
            .iter()
            .filter(|pool| pool.config().health_url.is_some())
            .count();
        if probed == 0 {
            tracing::info!("No pool has a health URL, health monitor disabled");
            return;
        }

        tracing::info!(interval = ?self.interval, pools = probed, "Health monitor starting");

        let mut ticker = time::interval(self.interval);
        let mut last: BTreeMap<String, bool> = BTreeMap::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.client.health_check().await;
                    for (pool, healthy) in &report.pools {
                        if last.get(pool) != Some(healthy) {
                            if *healthy {
                                tracing::info!(pool = %pool, "Pool healthy");
                            } else {
                                tracing::warn!(pool = %pool, "Pool unhealthy");
                            }
                        }
                    }
                    last = report.pools;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
