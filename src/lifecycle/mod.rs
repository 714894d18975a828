//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     GuardConfig → Validate → Breakers → Client → Cache → Background tasks
//!
//! Shutdown (shutdown.rs):
//!     trigger() → sweeper and health monitor leave their loops
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger()
//! ```
//!
//! # Design Decisions
//! - The host application owns the runtime and the listeners; this module
//!   only builds and stops what the layer itself runs

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{shutdown_on_signal, termination_signal};
pub use startup::{Components, StartupError};
