//! Request counters and rolling latency for the resilient client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tokio::time::Instant;

use crate::observability::metrics;

/// Point-in-time view of the client counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Mean of the retained latency samples, 0 when there are none.
    pub average_latency_ms: f64,
    pub in_flight: u64,
    pub batched_requests: u64,
}

/// Shared counters updated by every attempt.
#[derive(Debug)]
pub struct ClientMetrics {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
    batched: AtomicU64,
    latencies: Mutex<VecDeque<f64>>,
    window: usize,
}

impl ClientMetrics {
    pub fn new(window: usize) -> Self {
        Self {
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            batched: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(window)),
            window: window.max(1),
        }
    }

    /// Count a new attempt as started and in flight.
    pub fn start<'a>(&'a self, dependency: &'a str) -> AttemptGuard<'a> {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        AttemptGuard {
            metrics: self,
            dependency,
            started: Instant::now(),
            settled: false,
        }
    }

    pub fn record_batch(&self, size: usize) {
        self.batched.fetch_add(size as u64, Ordering::Relaxed);
    }

    fn push_latency(&self, latency_ms: f64) {
        let mut latencies = self.latencies.lock().unwrap_or_else(|p| p.into_inner());
        if latencies.len() == self.window {
            latencies.pop_front();
        }
        latencies.push_back(latency_ms);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let average_latency_ms = {
            let latencies = self.latencies.lock().unwrap_or_else(|p| p.into_inner());
            if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<f64>() / latencies.len() as f64
            }
        };

        MetricsSnapshot {
            total_requests: self.total.load(Ordering::Relaxed),
            successful_requests: self.succeeded.load(Ordering::Relaxed),
            failed_requests: self.failed.load(Ordering::Relaxed),
            average_latency_ms,
            in_flight: self.in_flight.load(Ordering::Relaxed),
            batched_requests: self.batched.load(Ordering::Relaxed),
        }
    }

    /// Zero the cumulative counters. In-flight is live state and is kept.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.batched.store(0, Ordering::Relaxed);
        self.latencies.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

/// Tracks one attempt; decrements in-flight on drop.
#[derive(Debug)]
pub struct AttemptGuard<'a> {
    metrics: &'a ClientMetrics,
    dependency: &'a str,
    started: Instant,
    settled: bool,
}

impl AttemptGuard<'_> {
    pub fn finish(mut self, success: bool) {
        self.settled = true;
        let latency = self.started.elapsed();
        let counter = if success {
            &self.metrics.succeeded
        } else {
            &self.metrics.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.metrics.push_latency(latency.as_secs_f64() * 1000.0);
        metrics::record_request(self.dependency, success, latency);
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
        if !self.settled {
            tracing::debug!(dependency = %self.dependency, "Attempt dropped before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_counts_and_average() {
        let m = ClientMetrics::new(100);
        let a = m.start("calendar");
        assert_eq!(m.snapshot().in_flight, 1);
        tokio::time::advance(Duration::from_millis(100)).await;
        a.finish(true);

        let b = m.start("calendar");
        tokio::time::advance(Duration::from_millis(300)).await;
        b.finish(false);

        let snap = m.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.in_flight, 0);
        assert!((snap.average_latency_ms - 200.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_keeps_latest_samples() {
        let m = ClientMetrics::new(2);
        for ms in [1000, 10, 20] {
            let g = m.start("x");
            tokio::time::advance(Duration::from_millis(ms)).await;
            g.finish(true);
        }
        assert!((m.snapshot().average_latency_ms - 15.0).abs() < 1.0);
    }

    #[test]
    fn test_reset_keeps_in_flight() {
        let m = ClientMetrics::new(10);
        m.record_batch(3);
        let guard = m.start("x");
        m.reset();

        let snap = m.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.batched_requests, 0);
        assert_eq!(snap.in_flight, 1);

        drop(guard);
        assert_eq!(m.snapshot().in_flight, 0);
        assert_eq!(m.snapshot().failed_requests, 0);
    }
}
