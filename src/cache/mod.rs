//! TTL cache subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound GET (middleware.rs):
//!     → route key from identity + path (key.rs)
//!     → store.rs lookup
//!         hit  → replay cached response (x-cache: HIT)
//!         miss → run handler, store 2xx body (x-cache: MISS)
//!
//! Mutation in the host application:
//!     → invalidate_user_data / invalidate_agent_data / invalidate_by_pattern
//!     → matching entries removed before the mutation returns
//! ```
//!
//! # Design Decisions
//! - Expiry is checked on every read; a single sweeper task reclaims memory
//! - Values are stored as JSON so one store serves every payload type
//! - Concurrent misses on one key are coalesced behind a per-key async lock

pub mod key;
pub mod middleware;
pub mod store;
pub mod types;

pub use key::{cache_key, route_key};
pub use middleware::{cache_middleware, CachedResponse, RouteCache, X_CACHE};
pub use store::{CacheManager, DEFAULT_TTL};
pub use types::{CacheError, CacheStats};
