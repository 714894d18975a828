use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::cache::CacheStats;
use crate::client::MetricsSnapshot;
use crate::resilience::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub open_breakers: usize,
    pub cache_entries: usize,
    pub in_flight: u64,
}

/// Exactly one selector is expected.
#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Serialize)]
pub struct InvalidateResult {
    pub removed: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let breakers = state.client.breakers().snapshots();
    let degraded = breakers.iter().any(|b| b.is_open);

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if degraded { "degraded" } else { "operational" },
        open_breakers: breakers.iter().filter(|b| b.is_open).count(),
        cache_entries: state.cache.stats().size,
        in_flight: state.client.metrics().in_flight,
    })
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.client.breakers().snapshots())
}

pub async fn reset_breaker(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.client.breakers().get(&name) {
        Some(breaker) => {
            breaker.reset();
            Json(breaker.snapshot()).into_response()
        }
        None => (StatusCode::NOT_FOUND, format!("Unknown dependency '{}'", name)).into_response(),
    }
}

pub async fn get_metrics(State(state): State<AdminState>) -> Json<MetricsSnapshot> {
    Json(state.client.metrics())
}

pub async fn reset_metrics(State(state): State<AdminState>) -> StatusCode {
    state.client.reset_metrics();
    StatusCode::NO_CONTENT
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

pub async fn clear_cache(State(state): State<AdminState>) -> StatusCode {
    state.cache.clear();
    StatusCode::NO_CONTENT
}

pub async fn invalidate_cache(State(state): State<AdminState>, Json(req): Json<InvalidateRequest>) -> Response {
    let removed = match (req.user_id, req.agent_id, req.pattern) {
        (Some(user), None, None) => state.cache.invalidate_user_data(&user),
        (None, Some(agent), None) => state.cache.invalidate_agent_data(&agent),
        (None, None, Some(pattern)) if !pattern.is_empty() => state.cache.invalidate_by_pattern(&pattern),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                "Provide exactly one of user_id, agent_id or a non-empty pattern",
            )
                .into_response()
        }
    };
    Json(InvalidateResult { removed }).into_response()
}

pub async fn get_health(State(state): State<AdminState>) -> Response {
    let report = state.client.health_check().await;
    let status = if report.all_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}
