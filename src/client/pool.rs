//! Transport pool management.
//!
//! # Responsibilities
//! - Build one connection-pooled transport per destination class
//! - Classify target hosts to the pool that owns them
//! - Fall back to the general pool for unclaimed hosts

use std::time::Duration;

use url::Url;

use crate::client::types::ClientError;
use crate::config::{ClientConfig, PoolConfig};

/// A connection-pooled HTTP transport for one destination class.
#[derive(Debug)]
pub struct TransportPool {
    config: PoolConfig,
    client: reqwest::Client,
}

impl TransportPool {
    pub fn new(config: PoolConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .tcp_keepalive(Duration::from_secs(config.tcp_keepalive_secs))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.timeout_ms));
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder.build().map_err(|e| {
            ClientError::InvalidRequest(format!("failed to build pool '{}': {}", config.name, e))
        })?;

        Ok(Self { config, client })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Exact host match, or `*.example.com` matching any subdomain of example.com.
    /// `host` must already be lowercase.
    pub fn matches_host(&self, host: &str) -> bool {
        self.config.hosts.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            match pattern.strip_prefix("*.") {
                Some(suffix) => host.len() > suffix.len() + 1
                    && host.ends_with(suffix)
                    && host.as_bytes()[host.len() - suffix.len() - 1] == b'.',
                None => pattern == host,
            }
        })
    }
}

/// Every configured pool plus the general fallback.
#[derive(Debug)]
pub struct PoolSet {
    general: TransportPool,
    dedicated: Vec<TransportPool>,
}

impl PoolSet {
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let general = TransportPool::new(config.general.clone())?;
        let dedicated = config
            .pools
            .iter()
            .cloned()
            .map(TransportPool::new)
            .collect::<Result<Vec<_>, _>>()?;

        for pool in &dedicated {
            tracing::debug!(pool = %pool.name(), hosts = ?pool.config().hosts, "Transport pool ready");
        }
        Ok(Self { general, dedicated })
    }

    /// Pool responsible for the URL's host.
    pub fn select(&self, url: &Url) -> &TransportPool {
        let Some(host) = url.host_str() else {
            return &self.general;
        };
        let host = host.to_ascii_lowercase();
        self.dedicated
            .iter()
            .find(|pool| pool.matches_host(&host))
            .unwrap_or(&self.general)
    }

    pub fn get(&self, name: &str) -> Option<&TransportPool> {
        self.iter().find(|pool| pool.name() == name)
    }

    /// General pool first, then dedicated pools in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &TransportPool> {
        std::iter::once(&self.general).chain(self.dedicated.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_set() -> PoolSet {
        let mut config = ClientConfig::default();
        config.pools = vec![
            PoolConfig {
                name: "calendar".into(),
                hosts: vec!["www.googleapis.com".into()],
                ..PoolConfig::default()
            },
            PoolConfig {
                name: "identity".into(),
                hosts: vec!["*.auth.example.com".into()],
                timeout_ms: 2_000,
                ..PoolConfig::default()
            },
        ];
        PoolSet::from_config(&config).unwrap()
    }

    #[test]
    fn test_classifies_by_host() {
        let pools = pool_set();
        let select = |u: &str| pools.select(&Url::parse(u).unwrap()).name().to_string();

        assert_eq!(select("https://www.googleapis.com/calendar/v3"), "calendar");
        assert_eq!(select("https://WWW.GOOGLEAPIS.COM/x"), "calendar");
        assert_eq!(select("https://tenant.auth.example.com/token"), "identity");
        assert_eq!(select("https://auth.example.com/token"), "general");
        assert_eq!(select("https://evilauth.example.com/token"), "general");
        assert_eq!(select("http://127.0.0.1:8080/"), "general");
    }

    #[test]
    fn test_iter_and_get() {
        let pools = pool_set();
        let names: Vec<_> = pools.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["general", "calendar", "identity"]);
        assert_eq!(pools.get("identity").unwrap().config().timeout_ms, 2_000);
        assert!(pools.get("missing").is_none());
    }
}
