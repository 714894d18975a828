//! Resilience and caching layer for calls to external dependencies.
//!
//! # Architecture Overview
//!
//! ```text
//!   inbound GET ──▶ cache::middleware ──hit──▶ cached response
//!                        │ miss
//!                        ▼
//!                  host handler ──▶ client::ResilientClient
//!                                        │ retry_with_backoff
//!                                        ▼
//!                               resilience::CircuitBreaker (per attempt)
//!                                        │
//!                                        ▼
//!                               client::pool (reqwest, per destination class)
//! ```
//!
//! Cross-cutting: `config` (TOML + validation), `observability` (tracing,
//! Prometheus), `health` (pool probes), `lifecycle` (composition root,
//! shutdown), `admin` (operator HTTP surface).

// Core subsystems
pub mod cache;
pub mod client;
pub mod resilience;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use cache::{cache_key, cache_middleware, CacheManager, CacheStats, RouteCache};
pub use client::{ClientError, MetricsSnapshot, Priority, RequestConfig, ResilientClient};
pub use config::GuardConfig;
pub use health::HealthReport;
pub use lifecycle::{Components, Shutdown};
pub use resilience::{BreakerRegistry, CircuitBreaker, CircuitOpenError, CircuitState};
