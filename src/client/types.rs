//! Request description and error types for outbound calls.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::resilience::CircuitOpenError;

/// Scheduling class of a call inside a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Structured description of one logical outbound call.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub url: String,
    /// JSON body, sent with `content-type: application/json`.
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    /// Retries after the first attempt; client default when `None`.
    pub retries: Option<u32>,
    /// Base backoff delay in milliseconds; client default when `None`.
    pub retry_delay_ms: Option<u64>,
    pub priority: Priority,
    /// Breaker name; the selected pool's name when `None`.
    pub dependency: Option<String>,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: Vec::new(),
            retries: None,
            retry_delay_ms: None,
            priority: Priority::Normal,
            dependency: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = Some(delay_ms);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }
}

/// Errors returned by the resilient client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The dependency answered with a non-success status.
    #[error("{url} responded with HTTP {status}")]
    Status { status: u16, url: String, body: String },

    /// The pool's per-call timeout elapsed.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Connection, TLS or protocol failure.
    #[error("network error calling {url}: {message}")]
    Network { url: String, message: String },

    /// Rejected without a network attempt.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The request could not be built (bad URL, header, pool setup).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response body did not match the expected shape.
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ClientError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout { url: url.to_string() }
        } else if err.is_builder() {
            ClientError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            ClientError::Decode {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            ClientError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// HTTP status, if the dependency answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transient errors (5xx, 429, timeouts, network) are worth another attempt.
    /// Other 4xx, breaker rejections and local errors are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Status { status, .. } => *status == 429 || *status >= 500,
            ClientError::Timeout { .. } | ClientError::Network { .. } => true,
            ClientError::CircuitOpen(_) | ClientError::InvalidRequest(_) | ClientError::Decode { .. } => false,
        }
    }

    /// Whether the error says something about the dependency's health.
    pub fn is_dependency_failure(&self) -> bool {
        self.is_retryable()
    }
}
