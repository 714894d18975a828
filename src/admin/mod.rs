//! Admin control surface.
//!
//! # Routes
//! - `GET /admin/status`: version and a one-line summary
//! - `GET /admin/breakers`, `POST /admin/breakers/{name}/reset`
//! - `GET /admin/metrics`, `POST /admin/metrics/reset`
//! - `GET /admin/cache`, `POST /admin/cache/invalidate`, `DELETE /admin/cache`
//! - `GET /admin/health`: probes pools, 503 when any is down
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::cache::CacheManager;
use crate::client::ResilientClient;
use crate::config::AdminConfig;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state of the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub client: Arc<ResilientClient>,
    pub cache: Arc<CacheManager>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(client: Arc<ResilientClient>, cache: Arc<CacheManager>, config: &AdminConfig) -> Self {
        Self {
            client,
            cache,
            api_key: Arc::from(config.api_key.as_str()),
        }
    }
}

pub fn router(state: AdminState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .route("/admin/metrics", get(get_metrics))
        .route("/admin/metrics/reset", post(reset_metrics))
        .route("/admin/cache", get(get_cache).delete(clear_cache))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route("/admin/health", get(get_health))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
