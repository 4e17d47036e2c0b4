//! Real-time event ingestion
//!
//! Every accepted event updates the user's session window, bumps trending
//! counters for view/click/purchase, drops the user's cached lists and notes
//! the interaction in the catalog. A fresh list is then computed straight
//! through the ensemble and returned.
//!
//! Events for one user are applied in arrival order: side effects run under
//! a striped per-user lock, and tokio's mutex is FIFO.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use shoprec_common::{Result, UserEvent};

use crate::catalog::Catalog;
use crate::ensemble::{EnsembleScoringCache, RecommendationList, ScoringContext};
use crate::metrics::EngineMetrics;
use crate::session::SessionWindowStore;
use crate::trending::TrendingScoreTracker;

/// Number of striped per-user locks
const USER_LOCK_STRIPES: usize = 64;

/// Recent events kept for inspection
pub const RECENT_EVENT_CAPACITY: usize = 10_000;

/// Trending score added per signal event
const TRENDING_BUMP: f64 = 1.0;

pub struct EventIngestionPipeline {
    sessions: Arc<SessionWindowStore>,
    trending: Arc<TrendingScoreTracker>,
    ensemble: Arc<EnsembleScoringCache>,
    catalog: Arc<dyn Catalog>,
    metrics: Arc<EngineMetrics>,
    user_locks: Vec<Mutex<()>>,
    recent: RwLock<VecDeque<UserEvent>>,
    recent_capacity: usize,
    realtime_count: usize,
}

impl EventIngestionPipeline {
    pub fn new(
        sessions: Arc<SessionWindowStore>,
        trending: Arc<TrendingScoreTracker>,
        ensemble: Arc<EnsembleScoringCache>,
        catalog: Arc<dyn Catalog>,
        metrics: Arc<EngineMetrics>,
        realtime_count: usize,
    ) -> Self {
        Self {
            sessions,
            trending,
            ensemble,
            catalog,
            metrics,
            user_locks: (0..USER_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            recent: RwLock::new(VecDeque::new()),
            recent_capacity: RECENT_EVENT_CAPACITY,
            realtime_count,
        }
    }

    /// Override the size of the recent-event log
    pub fn with_recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity.max(1);
        self
    }

    /// Ingest an event and return fresh recommendations for its user
    pub async fn ingest(&self, event: UserEvent) -> Result<RecommendationList> {
        self.ingest_with_context(event, &ScoringContext::default()).await
    }

    /// [`ingest`](Self::ingest) with an experiment scoring context
    ///
    /// Invalid events are rejected before any state changes.
    pub async fn ingest_with_context(&self, event: UserEvent, ctx: &ScoringContext) -> Result<RecommendationList> {
        if let Err(e) = event.validate() {
            self.metrics.record_event_rejected();
            return Err(e);
        }

        let user_id = event.user_id.clone();
        {
            let _guard = self.lock_for(&user_id).lock().await;
            self.apply(&event).await;
        }
        self.log_recent(event).await;
        self.metrics.record_event_ingested();

        Ok(self.ensemble.compute(&user_id, self.realtime_count, ctx).await)
    }

    /// Side effects of one event; none of them stops the others
    async fn apply(&self, event: &UserEvent) {
        self.sessions.append(&event.user_id, event.clone()).await;

        if event.event_type.is_trending_signal() {
            self.trending.bump(&event.item_id, TRENDING_BUMP).await;
        }

        if let Err(e) = self.ensemble.invalidate(&event.user_id).await {
            warn!("Cache invalidation failed for {}: {}", event.user_id, e);
        }

        if let Err(e) = self.catalog.record_interaction(&event.user_id, &event.item_id).await {
            warn!(
                "Failed to record interaction {}/{}: {}",
                event.user_id, event.item_id, e
            );
        }

        debug!(
            user_id = %event.user_id,
            item_id = %event.item_id,
            event_type = %event.event_type,
            "Ingested event"
        );
    }

    async fn log_recent(&self, event: UserEvent) {
        let mut recent = self.recent.write().await;
        recent.push_back(event);
        while recent.len() > self.recent_capacity {
            recent.pop_front();
        }
    }

    /// Most recent ingested events across all users, newest first
    pub async fn recent_events(&self, limit: usize) -> Vec<UserEvent> {
        self.recent.read().await.iter().rev().take(limit).cloned().collect()
    }

    fn lock_for(&self, user_id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        let index = (hasher.finish() % self.user_locks.len() as u64) as usize;
        &self.user_locks[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use shoprec_common::config::EngineConfig;
    use shoprec_common::{time, Error, EventType, KvStore, MemoryStore};
    use std::time::Duration;

    struct Fixture {
        pipeline: EventIngestionPipeline,
        ensemble: Arc<EnsembleScoringCache>,
        sessions: Arc<SessionWindowStore>,
        trending: Arc<TrendingScoreTracker>,
        store: Arc<MemoryStore>,
        metrics: Arc<EngineMetrics>,
    }

    fn fixture() -> Fixture {
        let config = EngineConfig::default();
        let catalog: Arc<dyn Catalog> = Arc::new(MemoryCatalog::new(["p1", "p2", "p3", "p42"]));
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(EngineMetrics::new());
        let sessions = Arc::new(SessionWindowStore::new(10, Duration::from_secs(3600)));
        let trending = Arc::new(TrendingScoreTracker::new(1.0, 100.0));
        let ensemble = Arc::new(EnsembleScoringCache::new(
            &config,
            catalog.clone(),
            trending.clone(),
            store.clone(),
            metrics.clone(),
        ));
        let pipeline = EventIngestionPipeline::new(
            sessions.clone(),
            trending.clone(),
            ensemble.clone(),
            catalog,
            metrics.clone(),
            10,
        );
        Fixture {
            pipeline,
            ensemble,
            sessions,
            trending,
            store,
            metrics,
        }
    }

    fn event(user: &str, item: &str, event_type: EventType) -> UserEvent {
        UserEvent::new(user, item, event_type, time::now())
    }

    #[tokio::test]
    async fn test_invalid_event_changes_nothing() {
        let f = fixture();
        let err = f
            .pipeline
            .ingest(event("  ", "p1", EventType::Purchase))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEvent(_)));
        assert_eq!(f.sessions.user_count().await, 0);
        assert!(f.trending.is_empty().await);
        assert!(f.pipeline.recent_events(10).await.is_empty());
        assert_eq!(f.metrics.snapshot().events_rejected, 1);
    }

    #[tokio::test]
    async fn test_signal_events_bump_trending() {
        let f = fixture();
        f.pipeline.ingest(event("u1", "p1", EventType::View)).await.unwrap();
        f.pipeline.ingest(event("u1", "p2", EventType::Cart)).await.unwrap();
        f.pipeline.ingest(event("u2", "p1", EventType::Purchase)).await.unwrap();

        assert_eq!(f.trending.raw_score("p1").await, Some(2.0));
        assert_eq!(f.trending.raw_score("p2").await, None);
        assert_eq!(f.sessions.recent("u1", 10).await.len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_excludes_touched_items_and_invalidates_cache() {
        let f = fixture();
        let ctx = ScoringContext::default();
        let before = f.ensemble.get_recommendations("u1", 10, &ctx).await;
        assert_eq!(before.items.len(), 4);
        assert_eq!(f.store.len().await, 1);

        let fresh = f.pipeline.ingest(event("u1", "p42", EventType::Purchase)).await.unwrap();
        assert!(!fresh.item_ids().contains(&"p42"));
        assert_eq!(f.store.get("recs:u1:10:default").await.unwrap(), None);

        let misses = f.metrics.cache_misses();
        f.ensemble.get_recommendations("u1", 10, &ctx).await;
        assert_eq!(f.metrics.cache_misses(), misses + 1);
    }

    #[tokio::test]
    async fn test_recent_log_is_bounded() {
        let f = fixture();
        let pipeline = f.pipeline.with_recent_capacity(2);
        for item in ["p1", "p2", "p3"] {
            pipeline.ingest(event("u1", item, EventType::Like)).await.unwrap();
        }
        let recent: Vec<String> = pipeline
            .recent_events(10)
            .await
            .into_iter()
            .map(|e| e.item_id)
            .collect();
        assert_eq!(recent, vec!["p3", "p2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest_keeps_every_event() {
        let f = fixture();
        let pipeline = Arc::new(f.pipeline);
        let handles: Vec<_> = (0..40)
            .map(|i| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let user = format!("u{}", i % 4);
                    pipeline.ingest(event(&user, "p1", EventType::Click)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(f.trending.raw_score("p1").await, Some(40.0));
        assert_eq!(f.metrics.snapshot().events_ingested, 40);
        for u in 0..4 {
            assert_eq!(f.sessions.recent(&format!("u{}", u), 100).await.len(), 10);
        }
    }
}
