//! Response caching middleware for read endpoints.
//!
//! # Responsibilities
//! - Serve cached GET responses keyed by caller identity and path
//! - Store successful handler responses on a miss
//! - Mark served and stored responses with `x-cache: HIT` or `x-cache: MISS`
//! - Let concurrent misses for one key share a single handler run
//!
//! Non-GET requests, non-2xx responses and bodies over `max_body_bytes` pass
//! through without a marker. Waiters on a shared run receive the leader's
//! response even when it was not stored; a leader whose body could not be
//! buffered releases its waiters to run the handler themselves.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::{mapref::entry::Entry, DashMap};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cache::key::route_key;
use crate::cache::store::CacheManager;
use crate::config::CacheConfig;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

const ANONYMOUS: &str = "anonymous";

/// Stored form of a handler response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Result of a handler run, published to requests waiting on the same key.
#[derive(Debug)]
struct Outcome {
    response: CachedResponse,
    stored: bool,
}

impl Outcome {
    fn replay(&self) -> Response {
        replay(self.response.clone(), self.stored)
    }
}

type OutcomeRx = watch::Receiver<Option<Arc<Outcome>>>;

/// Middleware state: the shared cache plus route caching settings.
#[derive(Debug, Clone)]
pub struct RouteCache {
    cache: Arc<CacheManager>,
    identity_header: HeaderName,
    max_body_bytes: usize,
    coalesce_misses: bool,
    ttl: Option<Duration>,
    flights: Arc<DashMap<String, OutcomeRx>>,
}

enum Flight {
    Leader(FlightLead),
    Follower(OutcomeRx),
}

/// Held by the request running the handler for a key. Leaves the flight map on drop.
struct FlightLead {
    flights: Arc<DashMap<String, OutcomeRx>>,
    key: String,
    tx: watch::Sender<Option<Arc<Outcome>>>,
}

impl FlightLead {
    fn publish(self, outcome: Outcome) {
        self.tx.send_replace(Some(Arc::new(outcome)));
    }
}

impl Drop for FlightLead {
    fn drop(&mut self) {
        self.flights.remove(&self.key);
    }
}

enum Buffered {
    Complete(Bytes),
    Oversized(Body),
}

impl RouteCache {
    pub fn new(cache: Arc<CacheManager>, config: &CacheConfig) -> Self {
        let identity_header = HeaderName::from_bytes(config.identity_header.as_bytes()).unwrap_or_else(|_| {
            tracing::warn!(header = %config.identity_header, "Invalid identity header, falling back to x-user-id");
            HeaderName::from_static("x-user-id")
        });
        Self {
            cache,
            identity_header,
            max_body_bytes: config.max_body_bytes,
            coalesce_misses: config.coalesce_misses,
            ttl: None,
            flights: Arc::new(DashMap::new()),
        }
    }

    /// TTL for stored responses; the cache default when unset.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    fn key_for(&self, req: &Request<Body>) -> String {
        let identity = req
            .headers()
            .get(&self.identity_header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS);
        let path = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        route_key(identity, path)
    }

    fn lookup(&self, key: &str, counted: bool) -> Option<CachedResponse> {
        let value = if counted {
            self.cache.get_raw(key)?
        } else {
            self.cache.peek(key)?
        };
        serde_json::from_value(value).ok()
    }

    fn join_flight(&self, key: &str) -> Flight {
        match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) => Flight::Follower(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                Flight::Leader(FlightLead {
                    flights: Arc::clone(&self.flights),
                    key: key.to_string(),
                    tx,
                })
            }
        }
    }

    /// Run the handler, store a cacheable response, and return what waiters may reuse.
    async fn fetch(&self, key: &str, req: Request<Body>, next: Next) -> (Response, Option<Outcome>) {
        let response = next.run(req).await;
        let (mut parts, body) = response.into_parts();

        let declared_too_large = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .is_some_and(|len| len > self.max_body_bytes);
        if declared_too_large {
            return (Response::from_parts(parts, body), None);
        }

        let bytes = match buffer_body(body, self.max_body_bytes).await {
            Ok(Buffered::Complete(bytes)) => bytes,
            Ok(Buffered::Oversized(body)) => return (Response::from_parts(parts, body), None),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to buffer response body");
                return ((StatusCode::BAD_GATEWAY, "Failed to read response body").into_response(), None);
            }
        };

        let text = std::str::from_utf8(&bytes).ok().map(str::to_string);
        let Some(text) = text else {
            return (Response::from_parts(parts, Body::from(bytes)), None);
        };

        let cached = CachedResponse {
            status: parts.status.as_u16(),
            content_type: parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: text,
        };
        let mut stored = false;
        if parts.status.is_success() {
            match self.cache.set(key, &cached, self.ttl) {
                Ok(()) => {
                    stored = true;
                    parts.headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "Response not cached"),
            }
        }

        let outcome = Outcome {
            response: cached,
            stored,
        };
        (Response::from_parts(parts, Body::from(bytes)), Some(outcome))
    }
}

pub async fn cache_middleware(
    State(route_cache): State<RouteCache>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let key = route_cache.key_for(&req);
    if let Some(hit) = route_cache.lookup(&key, true) {
        tracing::debug!(key = %key, "Route cache hit");
        return replay(hit, true);
    }

    if !route_cache.coalesce_misses {
        return route_cache.fetch(&key, req, next).await.0;
    }

    match route_cache.join_flight(&key) {
        Flight::Follower(rx) => {
            if let Some(outcome) = await_leader(rx).await {
                tracing::debug!(key = %key, stored = outcome.stored, "Reusing concurrent response");
                return outcome.replay();
            }
            route_cache.fetch(&key, req, next).await.0
        }
        Flight::Leader(lead) => {
            // A run that finished between the lookup and joining may have filled the entry.
            if let Some(hit) = route_cache.lookup(&key, false) {
                lead.publish(Outcome {
                    response: hit.clone(),
                    stored: true,
                });
                return replay(hit, true);
            }
            let (response, outcome) = route_cache.fetch(&key, req, next).await;
            if let Some(outcome) = outcome {
                lead.publish(outcome);
            }
            response
        }
    }
}

/// Wait for the leader's result. `None` when the leader finished without one.
async fn await_leader(mut rx: OutcomeRx) -> Option<Arc<Outcome>> {
    let outcome = rx.wait_for(Option::is_some).await.ok()?.clone();
    outcome
}

/// Buffer up to `limit` bytes. A longer body is handed back intact for streaming.
async fn buffer_body(body: Body, limit: usize) -> Result<Buffered, axum::Error> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(&chunk);
        if buf.len() > limit {
            let prefix = futures_util::stream::once(async move { Ok::<_, axum::Error>(Bytes::from(buf)) });
            return Ok(Buffered::Oversized(Body::from_stream(prefix.chain(stream))));
        }
    }
    Ok(Buffered::Complete(Bytes::from(buf)))
}

fn replay(cached: CachedResponse, hit: bool) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut response = (status, cached.body).into_response();
    let headers = response.headers_mut();
    match cached.content_type.and_then(|v| HeaderValue::from_str(&v).ok()) {
        Some(content_type) => {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        None => {
            headers.remove(header::CONTENT_TYPE);
        }
    }
    if hit {
        headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_cache() -> RouteCache {
        RouteCache::new(Arc::new(CacheManager::default()), &CacheConfig::default())
    }

    #[test]
    fn test_key_uses_identity_and_query() {
        let rc = route_cache();
        let req = Request::get("/api/agents?page=2")
            .header("x-user-id", "u42")
            .body(Body::empty())
            .unwrap();
        assert_eq!(rc.key_for(&req), "route:u42:/api/agents?page=2");

        let anonymous = Request::get("/api/agents").body(Body::empty()).unwrap();
        assert_eq!(rc.key_for(&anonymous), "route:anonymous:/api/agents");
    }

    #[test]
    fn test_replay_restores_status_and_type() {
        let response = replay(CachedResponse {
            status: 201,
            content_type: Some("application/json".into()),
            body: "{}".into(),
        }, true);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[X_CACHE], "HIT");
    }

    #[test]
    fn test_replay_of_unstored_response_has_no_marker() {
        let response = replay(CachedResponse {
            status: 502,
            content_type: None,
            body: "upstream down".into(),
        }, false);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get(X_CACHE).is_none());
    }

    #[tokio::test]
    async fn test_buffer_body_hands_back_oversized_stream() {
        let chunks = ["abc", "def", "ghi"].map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes())));
        let body = Body::from_stream(futures_util::stream::iter(chunks));

        let Buffered::Oversized(body) = buffer_body(body, 4).await.unwrap() else {
            panic!("expected oversized body");
        };
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"abcdefghi");

        let Buffered::Complete(bytes) = buffer_body(Body::from("small"), 8).await.unwrap() else {
            panic!("expected complete body");
        };
        assert_eq!(&bytes[..], b"small");
    }

    #[test]
    fn test_flight_entry_removed_when_leader_drops() {
        let rc = route_cache();
        let Flight::Leader(lead) = rc.join_flight("route:anonymous:/a") else {
            panic!("first request should lead");
        };
        assert!(matches!(rc.join_flight("route:anonymous:/a"), Flight::Follower(_)));
        drop(lead);
        assert!(rc.flights.is_empty());
    }

    #[test]
    fn test_invalid_identity_header_falls_back() {
        let config = CacheConfig {
            identity_header: "bad header".into(),
            ..CacheConfig::default()
        };
        let rc = RouteCache::new(Arc::new(CacheManager::default()), &config);
        assert_eq!(rc.identity_header, "x-user-id");
    }
}
