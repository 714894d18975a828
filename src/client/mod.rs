//! Resilient outbound client.
//!
//! # Responsibilities
//! - Route each call to the transport pool of its destination class
//! - Retry transient failures with jittered exponential backoff
//! - Guard every attempt with the dependency's circuit breaker
//! - Run batches concurrently while keeping results in input order
//! - Track request counts and rolling latency
//!
//! # Design Decisions
//! - 4xx responses other than 429 are terminal and do not count against the breaker
//! - A correlation id is generated per logical call and reused across its retries
//! - Breakers are shared through an injected registry, not owned per client

pub mod metrics;
pub mod pool;
pub mod resilient;
pub mod types;

pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use pool::{PoolSet, TransportPool};
pub use resilient::ResilientClient;
pub use types::{ClientError, Priority, RequestConfig};
