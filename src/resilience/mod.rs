//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to dependency:
//!     → retries.rs (retry loop; each attempt below)
//!         → circuit_breaker.rs (admit or fail fast, record outcome)
//!         → the call itself, bounded by the pool timeout (timeouts.rs for probes)
//!     → On retryable failure: backoff.rs (exponential delay + jitter)
//! ```
//!
//! # Design Decisions
//! - Every attempt, not just the outer call, updates breaker state
//! - Breaker rejection is never retried
//! - One breaker per dependency, owned by registry.rs
//! - All resilience logic is composable and transport-agnostic

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CallPermit, CircuitBreaker, CircuitOpenError, CircuitState};
pub use registry::BreakerRegistry;
pub use retries::{retry_with_backoff, RetryPolicy};
pub use timeouts::{with_deadline, TimedOut};
