//! Named breakers, one per logical dependency.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::BreakerSettings;
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker};

/// Lazily creates and hands out a shared breaker per dependency name.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    settings: BreakerSettings,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            breakers: DashMap::new(),
            settings,
        }
    }

    /// Get or create the breaker for a dependency.
    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return existing.clone();
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                tracing::debug!(dependency, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(dependency, self.settings.for_dependency(dependency)))
            })
            .clone()
    }

    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(dependency).map(|b| b.clone())
    }

    /// Snapshots of every known breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Reset one breaker. Returns false if the dependency is unknown.
    pub fn reset(&self, dependency: &str) -> bool {
        match self.breakers.get(dependency) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::resilience::circuit_breaker::CircuitState;

    fn registry() -> BreakerRegistry {
        let mut settings = BreakerSettings::default();
        settings.overrides.insert(
            "identity".into(),
            BreakerConfig { failure_threshold: 1, ..BreakerConfig::default() },
        );
        BreakerRegistry::new(settings)
    }

    #[test]
    fn test_same_name_same_breaker() {
        let registry = registry();
        let a = registry.get_or_create("calendar");
        let b = registry.get_or_create("calendar");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_overrides_applied() {
        let registry = registry();
        assert_eq!(registry.get_or_create("identity").config().failure_threshold, 1);
        assert_eq!(registry.get_or_create("calendar").config().failure_threshold, 5);
    }

    #[tokio::test]
    async fn test_breakers_are_independent_and_resettable() {
        let registry = registry();
        let identity = registry.get_or_create("identity");
        let calendar = registry.get_or_create("calendar");

        identity.try_acquire().unwrap().failure();
        assert_eq!(identity.state(), CircuitState::Open);
        assert_eq!(calendar.state(), CircuitState::Closed);

        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["calendar", "identity"]);

        assert!(registry.reset("identity"));
        assert!(!registry.reset("nope"));
        assert_eq!(identity.state(), CircuitState::Closed);
    }
}
