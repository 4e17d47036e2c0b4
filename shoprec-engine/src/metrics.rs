//! Engine counters
//!
//! Lock-free counters updated on the request path and read by the metrics
//! endpoint. Relaxed ordering is enough: every counter is independent.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by the pipeline, the ensemble and the API
#[derive(Debug, Default)]
pub struct EngineMetrics {
    recommendation_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    events_ingested: AtomicU64,
    events_rejected: AtomicU64,
    source_failures: AtomicU64,
    latency_micros_sum: AtomicU64,
    latency_count: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub recommendation_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub events_ingested: u64,
    pub events_rejected: u64,
    pub source_failures: u64,
    pub avg_recommendation_latency_ms: f64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, latency: Duration) {
        self.recommendation_requests.fetch_add(1, Ordering::Relaxed);
        self.latency_micros_sum
            .fetch_add(latency.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_failure(&self) {
        self.source_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn source_failures(&self) -> u64 {
        self.source_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.cache_hits();
        let misses = self.cache_misses();
        let lookups = hits + misses;
        let latency_count = self.latency_count.load(Ordering::Relaxed);
        let latency_sum = self.latency_micros_sum.load(Ordering::Relaxed);

        MetricsSnapshot {
            recommendation_requests: self.recommendation_requests.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            source_failures: self.source_failures(),
            avg_recommendation_latency_ms: if latency_count > 0 {
                latency_sum as f64 / latency_count as f64 / 1000.0
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = EngineMetrics::new().snapshot();
        assert_eq!(snapshot.cache_hit_rate, 0.0);
        assert_eq!(snapshot.avg_recommendation_latency_ms, 0.0);
    }

    #[test]
    fn test_hit_rate_and_latency() {
        let metrics = EngineMetrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_request(Duration::from_millis(2));
        metrics.record_request(Duration::from_millis(4));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hit_rate, 0.75);
        assert_eq!(snapshot.recommendation_requests, 2);
        assert!((snapshot.avg_recommendation_latency_ms - 3.0).abs() < 1e-9);
    }
}
