//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeouts > 0)
//! - Check pool names and URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{BreakerConfig, GuardConfig, PoolConfig, GENERAL_POOL};

/// Hard ceiling on configured retries; backoff doubles per attempt.
pub const MAX_RETRIES: u32 = 10;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_breaker("breaker.defaults", &config.breaker.defaults, &mut errors);
    for (name, breaker) in &config.breaker.overrides {
        validate_breaker(&format!("breaker.overrides.{}", name), breaker, &mut errors);
    }

    let client = &config.client;
    if client.retries > MAX_RETRIES {
        errors.push(ValidationError::new(
            "client.retries",
            format!("must be at most {}", MAX_RETRIES),
        ));
    }
    if client.retry_delay_ms == 0 {
        errors.push(ValidationError::new("client.retry_delay_ms", "must be greater than 0"));
    }
    if client.jitter_max_ms > client.retry_delay_ms {
        // Allowed, but consecutive delays are then no longer guaranteed to grow.
        tracing::warn!(
            jitter_max_ms = client.jitter_max_ms,
            retry_delay_ms = client.retry_delay_ms,
            "Jitter exceeds base retry delay"
        );
    }
    if client.latency_window == 0 {
        errors.push(ValidationError::new("client.latency_window", "must be greater than 0"));
    }
    if client.batch_concurrency == 0 {
        errors.push(ValidationError::new("client.batch_concurrency", "must be greater than 0"));
    }
    if client.health_timeout_ms == 0 {
        errors.push(ValidationError::new("client.health_timeout_ms", "must be greater than 0"));
    }
    if client.correlation_header.parse::<axum::http::HeaderName>().is_err() {
        errors.push(ValidationError::new("client.correlation_header", "not a valid header name"));
    }

    if client.general.name != GENERAL_POOL {
        errors.push(ValidationError::new(
            "client.general.name",
            format!("must be '{}'", GENERAL_POOL),
        ));
    }
    validate_pool("client.general", &client.general, &mut errors);

    let mut seen = HashSet::new();
    for (i, pool) in client.pools.iter().enumerate() {
        let field = format!("client.pools[{}]", i);
        if pool.name.is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if pool.name == GENERAL_POOL {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("'{}' is reserved", GENERAL_POOL),
            ));
        } else if !seen.insert(pool.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate pool '{}'", pool.name),
            ));
        }
        if pool.hosts.is_empty() {
            errors.push(ValidationError::new(format!("{}.hosts", field), "must list at least one host"));
        }
        validate_pool(&field, pool, &mut errors);
    }

    if config.cache.default_ttl_ms == 0 {
        errors.push(ValidationError::new("cache.default_ttl_ms", "must be greater than 0"));
    }
    if config.cache.sweep_interval_ms == 0 {
        errors.push(ValidationError::new("cache.sweep_interval_ms", "must be greater than 0"));
    }
    if config.cache.identity_header.parse::<axum::http::HeaderName>().is_err() {
        errors.push(ValidationError::new("cache.identity_header", "not a valid header name"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    if config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(field: &str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.failure_threshold", field), "must be greater than 0"));
    }
    if breaker.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.reset_timeout_ms", field), "must be greater than 0"));
    }
    if breaker.monitoring_window_ms == 0 {
        errors.push(ValidationError::new(format!("{}.monitoring_window_ms", field), "must be greater than 0"));
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.success_threshold", field), "must be greater than 0"));
    }
    if breaker.half_open_max_calls == 0 {
        errors.push(ValidationError::new(format!("{}.half_open_max_calls", field), "must be greater than 0"));
    }
}

fn validate_pool(field: &str, pool: &PoolConfig, errors: &mut Vec<ValidationError>) {
    if pool.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.timeout_ms", field), "must be greater than 0"));
    }
    if pool.connect_timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.connect_timeout_ms", field), "must be greater than 0"));
    }
    if let Some(health_url) = &pool.health_url {
        if url::Url::parse(health_url).is_err() {
            errors.push(ValidationError::new(
                format!("{}.health_url", field),
                format!("invalid URL '{}'", health_url),
            ));
        }
    }
}
