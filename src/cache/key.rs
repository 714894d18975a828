//! Cache key construction and matching.

use std::fmt::Display;

/// Namespace of keys written by the response cache middleware.
pub const ROUTE_NAMESPACE: &str = "route";

/// Build `prefix:p1:p2:...`. Pure; equal inputs always give equal keys.
pub fn cache_key<P: Display>(prefix: &str, params: &[P]) -> String {
    let mut key = String::from(prefix);
    for param in params {
        key.push(':');
        key.push_str(&param.to_string());
    }
    key
}

/// Key for a cached route response.
pub fn route_key(identity: &str, path_and_query: &str) -> String {
    format!("{}:{}:{}", ROUTE_NAMESPACE, identity, path_and_query)
}

fn is_boundary(c: char) -> bool {
    !c.is_alphanumeric()
}

/// Whether `id` occurs in `key` as a whole token, bounded by non-alphanumeric
/// characters or the ends of the key. `user:12` and `users/12.json` contain
/// `12`; `user:123` does not.
pub fn contains_token(key: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    key.match_indices(id).any(|(start, _)| {
        let end = start + id.len();
        let before_ok = key[..start].chars().next_back().map_or(true, is_boundary);
        let after_ok = key[end..].chars().next().map_or(true, is_boundary);
        before_ok && after_ok
    })
}

/// Whether `key` is scoped to entities of `kind`: its namespace (the part
/// before the first `:`) is `kind` or starts with `kind` as a whole word, as in
/// `user_agents:12`. Route keys are scoped to every kind.
pub fn in_entity_scope(key: &str, kind: &str) -> bool {
    let namespace = key.split(':').next().unwrap_or(key);
    if namespace == ROUTE_NAMESPACE {
        return true;
    }
    namespace
        .strip_prefix(kind)
        .is_some_and(|rest| rest.chars().next().map_or(true, is_boundary))
}
