//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: trial calls test whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures inside monitoring window >= failure_threshold
//! Open → Half-Open: first call after reset_timeout
//! Half-Open → Closed: success_threshold consecutive trial successes
//! Half-Open → Open: any trial failure
//! ```
//!
//! # Design Decisions
//! - One breaker per logical dependency (not global)
//! - Fail fast in Open state; the wrapped call is never started
//! - A success in Closed forgives one failure instead of clearing the window
//! - Old failures are pruned lazily on every call and outcome

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Returned instead of running the call while the breaker is open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker for '{dependency}' is open (retry in {retry_in:?})")]
pub struct CircuitOpenError {
    pub dependency: String,
    pub retry_in: Duration,
}

/// Read-only view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: usize,
    pub is_open: bool,
    pub half_open_successes: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    half_open_in_flight: u32,
    /// Bumped on every entry into Half-Open so stale trial permits are ignored.
    epoch: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            half_open_successes: 0,
            half_open_in_flight: 0,
            epoch: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn release_trial(&mut self, trial: Option<u64>) -> bool {
        match trial {
            Some(epoch) if epoch == self.epoch && self.state == CircuitState::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                true
            }
            _ => false,
        }
    }
}

/// Per-dependency circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for the named dependency.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name = name.into();
        metrics::record_breaker_state(&name, CircuitState::Closed);
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State stays consistent across a panicking holder; every write is a plain field store.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `call` through the breaker; every error counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.execute_classified(call, |_| true).await
    }

    /// Run `call` through the breaker, counting only errors for which
    /// `is_failure` returns true. Other errors prove the dependency answered
    /// and are recorded as successes. The error itself is returned unchanged.
    pub async fn execute_classified<T, E, F, Fut, C>(&self, call: F, is_failure: C) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
        C: FnOnce(&E) -> bool,
    {
        let permit = self.try_acquire()?;
        match call().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                if is_failure(&err) {
                    permit.failure();
                } else {
                    permit.success();
                }
                Err(err)
            }
        }
    }

    /// Ask for permission to make one call.
    ///
    /// The returned permit must be settled with [`CallPermit::success`] or
    /// [`CallPermit::failure`]; dropping it unsettled releases any half-open
    /// trial slot without recording an outcome.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.prune(now, self.config.monitoring_window());

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, None)),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                let reset_timeout = self.config.reset_timeout();
                if elapsed >= reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.epoch += 1;
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 1;
                    tracing::info!(dependency = %self.name, "Circuit half-open, admitting trial call");
                    metrics::record_breaker_state(&self.name, CircuitState::HalfOpen);
                    Ok(CallPermit::new(self, Some(inner.epoch)))
                } else {
                    Err(CircuitOpenError {
                        dependency: self.name.clone(),
                        retry_in: reset_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Ok(CallPermit::new(self, Some(inner.epoch)))
                } else {
                    Err(CircuitOpenError {
                        dependency: self.name.clone(),
                        retry_in: Duration::ZERO,
                    })
                }
            }
        }
    }

    fn record_success(&self, trial: Option<u64>) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.prune(now, self.config.monitoring_window());
        let current_trial = inner.release_trial(trial);

        match inner.state {
            CircuitState::Closed => {
                inner.failures.pop_front();
            }
            CircuitState::HalfOpen if current_trial => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.opened_at = None;
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 0;
                    tracing::info!(dependency = %self.name, "Circuit closed, dependency recovered");
                    metrics::record_breaker_state(&self.name, CircuitState::Closed);
                }
            }
            _ => {}
        }
    }

    fn record_failure(&self, trial: Option<u64>) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.prune(now, self.config.monitoring_window());
        inner.release_trial(trial);

        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    self.trip(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => self.trip(&mut inner, now),
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner, now: Instant) {
        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;
        tracing::warn!(
            dependency = %self.name,
            from = %from,
            failures = inner.failures.len(),
            reset_timeout_ms = self.config.reset_timeout_ms,
            "Circuit opened"
        );
        metrics::record_breaker_state(&self.name, CircuitState::Open);
    }

    /// Current state, failure count and open flag.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        inner.prune(Instant::now(), self.config.monitoring_window());
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures.len(),
            is_open: inner.state == CircuitState::Open,
            half_open_successes: inner.half_open_successes,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Force the breaker closed with no recorded failures.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let epoch = inner.epoch;
        *inner = BreakerInner::new();
        // Keep outstanding trial permits from counting against the fresh state.
        inner.epoch = epoch + 1;
        tracing::info!(dependency = %self.name, "Circuit manually reset");
        metrics::record_breaker_state(&self.name, CircuitState::Closed);
    }
}

/// Permission to perform one guarded call.
#[must_use = "settle the permit with success() or failure()"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: Option<u64>) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial.is_some() {
            self.breaker.lock().release_trial(self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Open,
        Boom,
        NotFound,
    }

    impl From<CircuitOpenError> for TestError {
        fn from(_: CircuitOpenError) -> Self {
            TestError::Open
        }
    }

    fn breaker(threshold: u32, reset_ms: u64, window_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                reset_timeout_ms: reset_ms,
                monitoring_window_ms: window_ms,
                ..BreakerConfig::default()
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), TestError> {
        cb.execute(|| async { Err::<(), _>(TestError::Boom) }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, TestError> {
        cb.execute(|| async { Ok::<_, TestError>(7) }).await
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let cb = breaker(3, 1000, 5000);
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 0);
        assert!(!snap.is_open);
        assert_eq!(succeed(&cb).await, Ok(7));
    }

    #[tokio::test]
    async fn test_opens_exactly_at_threshold() {
        let cb = breaker(4, 1000, 60_000);
        for _ in 0..3 {
            assert_eq!(fail(&cb).await, Err(TestError::Boom));
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        assert_eq!(fail(&cb).await, Err(TestError::Boom));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_never_invokes_call() {
        let cb = breaker(2, 10_000, 60_000);
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();

        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let result = cb
                .execute(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(())
                })
                .await;
            assert_eq!(result, Err(TestError::Open));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_forgives_one_failure() {
        let cb = breaker(3, 1000, 60_000);
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.snapshot().failures, 1);

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_failures_are_pruned() {
        let cb = breaker(3, 1000, 5000);
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();

        tokio::time::advance(Duration::from_millis(5001)).await;
        fail(&cb).await.unwrap_err();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovery_and_relapse() {
        let cb = breaker(1, 1000, 5000);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(succeed(&cb).await, Err(TestError::Open));

        tokio::time::advance(Duration::from_millis(1)).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().half_open_successes, 1);

        // A trial failure reopens and restarts the cooldown.
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(succeed(&cb).await, Err(TestError::Open));

        tokio::time::advance(Duration::from_millis(500)).await;
        for _ in 0..3 {
            succeed(&cb).await.unwrap();
        }
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_concurrent_trials() {
        let cb = CircuitBreaker::new(
            "limited",
            BreakerConfig {
                failure_threshold: 1,
                reset_timeout_ms: 100,
                half_open_max_calls: 1,
                ..BreakerConfig::default()
            },
        );
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(100)).await;

        let first = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_err());

        // Dropping an unsettled permit frees the slot without recording anything.
        drop(first);
        let second = cb.try_acquire().unwrap();
        second.success();
        assert_eq!(cb.snapshot().half_open_successes, 1);
    }

    #[tokio::test]
    async fn test_classified_errors_pass_through_unchanged() {
        let cb = breaker(1, 1000, 5000);
        let result: Result<(), TestError> = cb
            .execute_classified(|| async { Err(TestError::NotFound) }, |e| *e != TestError::NotFound)
            .await;
        assert_eq!(result, Err(TestError::NotFound));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let cb = breaker(1, 60_000, 60_000);
        fail(&cb).await.unwrap_err();
        assert!(cb.snapshot().is_open);

        cb.reset();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 0);
        assert_eq!(succeed(&cb).await, Ok(7));
    }

    #[test]
    fn test_open_error_display() {
        let err = CircuitOpenError {
            dependency: "calendar".into(),
            retry_in: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("'calendar' is open"));
    }
}
