//! The resilient client.
//!
//! # Data Flow
//! ```text
//! request(config)
//!     → pool.rs (classify host → transport)
//!     → registry (breaker for the dependency)
//!     → retry_with_backoff
//!         → breaker.execute_classified (per attempt)
//!             → send_once (metrics guard, HTTP call, body decode)
//! ```

use std::cmp::Reverse;
use std::sync::Arc;

use futures_util::future::join_all;
use reqwest::header::HeaderName;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::client::metrics::{ClientMetrics, MetricsSnapshot};
use crate::client::pool::{PoolSet, TransportPool};
use crate::client::types::{ClientError, RequestConfig};
use crate::config::validation::MAX_RETRIES;
use crate::config::ClientConfig;
use crate::health::{probe_pools, HealthReport};
use crate::resilience::{retry_with_backoff, BreakerRegistry, RetryPolicy};

/// Outbound HTTP client with retries, breakers, pooled transports and metrics.
#[derive(Debug)]
pub struct ResilientClient {
    config: ClientConfig,
    pools: PoolSet,
    breakers: Arc<BreakerRegistry>,
    metrics: ClientMetrics,
    correlation_header: HeaderName,
}

impl ResilientClient {
    pub fn new(config: ClientConfig, breakers: Arc<BreakerRegistry>) -> Result<Self, ClientError> {
        let correlation_header = HeaderName::from_bytes(config.correlation_header.as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("invalid correlation header: {}", e)))?;
        let pools = PoolSet::from_config(&config)?;
        let metrics = ClientMetrics::new(config.latency_window);

        Ok(Self {
            config,
            pools,
            breakers,
            metrics,
            correlation_header,
        })
    }

    /// Perform one logical call and return the decoded JSON body.
    ///
    /// Empty bodies decode to `Value::Null`; non-JSON bodies are returned as
    /// `Value::String`.
    pub async fn request(&self, request: RequestConfig) -> Result<Value, ClientError> {
        let url = Url::parse(&request.url)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid url '{}': {}", request.url, e)))?;
        let pool = self.pools.select(&url);
        let dependency = request
            .dependency
            .clone()
            .unwrap_or_else(|| pool.name().to_string());
        let breaker = self.breakers.get_or_create(&dependency);
        let policy = RetryPolicy {
            retries: request.retries.unwrap_or(self.config.retries).min(MAX_RETRIES),
            base_delay_ms: request.retry_delay_ms.unwrap_or(self.config.retry_delay_ms),
            jitter_max_ms: self.config.jitter_max_ms,
        };
        let correlation_id = Uuid::new_v4().to_string();

        let span = tracing::debug_span!(
            "upstream_call",
            dependency = %dependency,
            pool = %pool.name(),
            method = %request.method,
            correlation_id = %correlation_id,
        );

        let request = &request;
        let url = &url;
        let breaker = &breaker;
        let dependency = dependency.as_str();
        let correlation_id = correlation_id.as_str();

        retry_with_backoff(
            &policy,
            move |attempt| async move {
                breaker
                    .execute_classified(
                        || self.send_once(pool, request, url, dependency, correlation_id, attempt),
                        ClientError::is_dependency_failure,
                    )
                    .await
            },
            ClientError::is_retryable,
        )
        .instrument(span)
        .await
    }

    /// Like [`request`](Self::request), decoding the body into `T`.
    pub async fn request_json<T: DeserializeOwned>(&self, request: RequestConfig) -> Result<T, ClientError> {
        let url = request.url.clone();
        let value = self.request(request).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Decode {
            url,
            message: e.to_string(),
        })
    }

    /// Run every request concurrently and return the outcomes in input order.
    ///
    /// At most `batch_concurrency` calls are in flight; higher priority
    /// requests are started first.
    pub async fn batch_request(&self, requests: Vec<RequestConfig>) -> Vec<Result<Value, ClientError>> {
        if requests.is_empty() {
            return Vec::new();
        }
        self.metrics.record_batch(requests.len());
        tracing::debug!(size = requests.len(), "Dispatching batch");

        let mut queued: Vec<(usize, RequestConfig)> = requests.into_iter().enumerate().collect();
        queued.sort_by_key(|(_, request)| Reverse(request.priority));

        let slots = Semaphore::new(self.config.batch_concurrency.max(1));
        let slots = &slots;
        let calls = queued.into_iter().map(|(index, request)| async move {
            // The semaphore is never closed; the permit lives until the call ends.
            let _slot = slots.acquire().await;
            (index, self.request(request).await)
        });

        let mut results = join_all(calls).await;
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Probe every pool with a health URL and attach the current metrics.
    pub async fn health_check(&self) -> HealthReport {
        let pools = probe_pools(&self.pools, self.config.health_timeout_ms).await;
        HealthReport {
            pools,
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
        tracing::info!("Client metrics reset");
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn pools(&self) -> &PoolSet {
        &self.pools
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send_once(
        &self,
        pool: &TransportPool,
        request: &RequestConfig,
        url: &Url,
        dependency: &str,
        correlation_id: &str,
        attempt: u32,
    ) -> Result<Value, ClientError> {
        let guard = self.metrics.start(dependency);
        let result = self.dispatch(pool, request, url, correlation_id).await;
        guard.finish(result.is_ok());

        if let Err(err) = &result {
            tracing::debug!(attempt, error = %err, "Attempt failed");
        }
        result
    }

    async fn dispatch(
        &self,
        pool: &TransportPool,
        request: &RequestConfig,
        url: &Url,
        correlation_id: &str,
    ) -> Result<Value, ClientError> {
        let mut builder = pool
            .client()
            .request(request.method.clone(), url.clone())
            .header(self.correlation_header.clone(), correlation_id);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(url.as_str(), e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(url.as_str(), e))?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body: text,
            });
        }
        Ok(parse_body(&text))
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
