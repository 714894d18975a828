//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! On demand (ResilientClient::health_check):
//!     → probe.rs (GET each pool's health_url, bounded by health_timeout_ms)
//!     → HealthReport { pools, metrics }
//!
//! Background (monitor.rs):
//!     Periodic timer
//!     → health_check()
//!     → Log transitions, export pool gauge
//! ```
//!
//! # Design Decisions
//! - Health is reported per pool, not per host
//! - Probes bypass breakers and retries; they observe, they do not protect

pub mod monitor;
pub mod probe;

pub use monitor::HealthMonitor;
pub use probe::{probe_pools, HealthReport};
