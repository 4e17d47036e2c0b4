//! Weighted ensemble scoring with a TTL cache
//!
//! A cache miss scores every candidate item with every registered prediction
//! source, combines the scores with the configured weights and caches the top
//! results. Users with nothing left to discover get a popularity list built
//! from trending items, topped up from the catalog's popularity ranking.
//!
//! Cache writes are last-writer-wins per key: a miss computed concurrently
//! with an invalidation for the same user may land after the invalidation.
//! That race is accepted; the entry expires on its TTL either way.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use shoprec_common::config::EngineConfig;
use shoprec_common::kv::{self, KvStore};
use shoprec_common::{time, Result};

use crate::catalog::Catalog;
use crate::metrics::EngineMetrics;
use crate::sources::{PredictionSource, SourceError, NEUTRAL_SCORE};
use crate::trending::TrendingScoreTracker;

/// Candidates scored concurrently on a cache miss
const SCORING_CONCURRENCY: usize = 32;

/// Where a recommendation list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Personalized,
    Popularity,
    Empty,
}

/// One ranked recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: String,
    pub score: f64,
    /// 1-based position in the list
    pub rank: usize,
    pub algorithm: String,
}

/// Ranked recommendations for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationList {
    pub user_id: String,
    pub items: Vec<Recommendation>,
    pub source: RecommendationSource,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl RecommendationList {
    fn empty(user_id: &str, ctx: &ScoringContext) -> Self {
        Self {
            user_id: user_id.to_string(),
            items: Vec::new(),
            source: RecommendationSource::Empty,
            generated_at: time::now(),
            experiment_id: ctx.experiment_id.clone(),
            variant: ctx.variant.clone(),
        }
    }

    pub fn item_ids(&self) -> Vec<&str> {
        self.items.iter().map(|r| r.item_id.as_str()).collect()
    }
}

/// Request-specific scoring inputs, part of the cache key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringContext {
    pub experiment_id: Option<String>,
    pub variant: Option<String>,
    /// Per-source weight overrides merged over the configured weights
    pub weights: Option<BTreeMap<String, f64>>,
}

impl ScoringContext {
    /// Short stable digest of the context
    pub fn fingerprint(&self) -> String {
        if *self == ScoringContext::default() {
            return "default".to_string();
        }
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        let hex = format!("{:x}", digest);
        hex[..16].to_string()
    }
}

/// Ensemble scorer and recommendation cache
pub struct EnsembleScoringCache {
    catalog: Arc<dyn Catalog>,
    trending: Arc<TrendingScoreTracker>,
    store: Arc<dyn KvStore>,
    metrics: Arc<EngineMetrics>,
    sources: Vec<Arc<dyn PredictionSource>>,
    weights: BTreeMap<String, f64>,
    personalized_ttl: Duration,
    fallback_ttl: Duration,
    source_timeout: Duration,
}

impl EnsembleScoringCache {
    pub fn new(
        config: &EngineConfig,
        catalog: Arc<dyn Catalog>,
        trending: Arc<TrendingScoreTracker>,
        store: Arc<dyn KvStore>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            catalog,
            trending,
            store,
            metrics,
            sources: Vec::new(),
            weights: config.ensemble.weights.clone(),
            personalized_ttl: config.personalized_ttl(),
            fallback_ttl: config.fallback_ttl(),
            source_timeout: config.source_timeout(),
        }
    }

    /// Register a prediction source
    pub fn with_source(mut self, source: Arc<dyn PredictionSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Cached recommendations; computes and caches on a miss
    ///
    /// Never fails: catalog, store and source failures degrade the list
    /// (personalized → popularity → empty) instead of surfacing.
    pub async fn get_recommendations(
        &self,
        user_id: &str,
        count: usize,
        ctx: &ScoringContext,
    ) -> RecommendationList {
        let started = Instant::now();
        let key = cache_key(user_id, count, ctx);

        match kv::get_json::<RecommendationList>(self.store.as_ref(), &key).await {
            Ok(Some(cached)) => {
                self.metrics.record_cache_hit();
                self.metrics.record_request(started.elapsed());
                debug!(user_id, count, "Recommendation cache hit");
                return cached;
            }
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for {}: {}", key, e),
        }
        self.metrics.record_cache_miss();

        let (list, ttl) = self.build(user_id, count, ctx).await;
        if !list.items.is_empty() {
            if let Err(e) = kv::set_json(self.store.as_ref(), &key, &list, Some(ttl)).await {
                warn!("Cache write failed for {}: {}", key, e);
            }
        }

        self.metrics.record_request(started.elapsed());
        list
    }

    /// Fresh recommendations that bypass the cache entirely
    pub async fn compute(&self, user_id: &str, count: usize, ctx: &ScoringContext) -> RecommendationList {
        self.build(user_id, count, ctx).await.0
    }

    /// Drop every cached list for a user
    pub async fn invalidate(&self, user_id: &str) -> Result<usize> {
        let removed = self.store.delete_prefix(&user_prefix(user_id)).await?;
        debug!(user_id, removed, "Invalidated cached recommendations");
        Ok(removed)
    }

    async fn build(
        &self,
        user_id: &str,
        count: usize,
        ctx: &ScoringContext,
    ) -> (RecommendationList, Duration) {
        if count == 0 {
            return (RecommendationList::empty(user_id, ctx), self.fallback_ttl);
        }

        let candidates = match self.catalog.items_excluding(user_id).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Catalog lookup failed for {}: {}", user_id, e);
                Vec::new()
            }
        };

        if !candidates.is_empty() {
            let items = self.score_candidates(user_id, candidates, count, ctx).await;
            let list = RecommendationList {
                user_id: user_id.to_string(),
                items,
                source: RecommendationSource::Personalized,
                generated_at: time::now(),
                experiment_id: ctx.experiment_id.clone(),
                variant: ctx.variant.clone(),
            };
            return (list, self.personalized_ttl);
        }

        let items = self.popularity(count).await;
        let mut list = RecommendationList::empty(user_id, ctx);
        if !items.is_empty() {
            list.source = RecommendationSource::Popularity;
            list.items = items;
        }
        (list, self.fallback_ttl)
    }

    async fn score_candidates(
        &self,
        user_id: &str,
        candidates: Vec<String>,
        count: usize,
        ctx: &ScoringContext,
    ) -> Vec<Recommendation> {
        let weights = self.effective_weights(ctx);
        let weights = &weights;

        // `buffered` keeps catalog order, which the stable sort below relies on
        let mut scored: Vec<(String, f64)> = stream::iter(candidates.into_iter().map(|item| async move {
            let score = self.combined_score(user_id, &item, weights).await;
            (item, score)
        }))
        .buffered(SCORING_CONCURRENCY)
        .collect()
        .await;

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .take(count)
            .enumerate()
            .map(|(idx, (item_id, score))| Recommendation {
                item_id,
                score,
                rank: idx + 1,
                algorithm: "hybrid_ensemble".to_string(),
            })
            .collect()
    }

    /// Weighted mean of all source scores for one pair
    async fn combined_score(&self, user_id: &str, item_id: &str, weights: &BTreeMap<String, f64>) -> f64 {
        let results = join_all(self.sources.iter().map(|source| async move {
            (source.name(), self.call_source(source.as_ref(), user_id, item_id).await)
        }))
        .await;

        let mut by_name: HashMap<&str, f64> = HashMap::with_capacity(results.len());
        for (name, result) in results {
            let score = match result {
                Ok(score) => score,
                Err(e) => {
                    self.metrics.record_source_failure();
                    debug!(source = name, user_id, item_id, "Using neutral score: {}", e);
                    NEUTRAL_SCORE
                }
            };
            by_name.insert(name, score);
        }

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for (name, weight) in weights {
            let score = by_name.get(name.as_str()).copied().unwrap_or(NEUTRAL_SCORE);
            weighted_sum += weight * score;
            total_weight += weight;
        }
        for source in &self.sources {
            if !weights.contains_key(source.name()) {
                weighted_sum += by_name.get(source.name()).copied().unwrap_or(NEUTRAL_SCORE);
                total_weight += 1.0;
            }
        }

        if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            NEUTRAL_SCORE
        }
    }

    async fn call_source(
        &self,
        source: &dyn PredictionSource,
        user_id: &str,
        item_id: &str,
    ) -> std::result::Result<f64, SourceError> {
        match tokio::time::timeout(self.source_timeout, source.score(user_id, item_id)).await {
            Err(_) => Err(SourceError::Timeout(self.source_timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(score)) if score.is_nan() => Err(SourceError::InvalidScore(score)),
            Ok(Ok(score)) => Ok(score.clamp(0.0, 1.0)),
        }
    }

    fn effective_weights(&self, ctx: &ScoringContext) -> BTreeMap<String, f64> {
        let mut weights = self.weights.clone();
        if let Some(overrides) = &ctx.weights {
            for (name, weight) in overrides {
                if weight.is_finite() && *weight >= 0.0 {
                    weights.insert(name.clone(), *weight);
                }
            }
        }
        weights
    }

    /// Trending items first, then the catalog's popularity ranking
    async fn popularity(&self, count: usize) -> Vec<Recommendation> {
        let mut items: Vec<(String, f64, &'static str)> = Vec::new();
        let mut seen = HashSet::new();

        for trending in self.trending.top(count).await {
            seen.insert(trending.item_id.clone());
            items.push((trending.item_id, trending.score, "trending"));
        }

        if items.len() < count {
            match self.catalog.item_popularity_rank(count).await {
                Ok(ranked) => {
                    for item_id in ranked {
                        if items.len() >= count {
                            break;
                        }
                        if seen.insert(item_id.clone()) {
                            items.push((item_id, NEUTRAL_SCORE, "popularity_fallback"));
                        }
                    }
                }
                Err(e) => warn!("Catalog popularity lookup failed: {}", e),
            }
        }

        items
            .into_iter()
            .enumerate()
            .map(|(idx, (item_id, score, algorithm))| Recommendation {
                item_id,
                score,
                rank: idx + 1,
                algorithm: algorithm.to_string(),
            })
            .collect()
    }
}

fn user_prefix(user_id: &str) -> String {
    format!("recs:{}:", user_id)
}

fn cache_key(user_id: &str, count: usize, ctx: &ScoringContext) -> String {
    format!("{}{}:{}", user_prefix(user_id), count, ctx.fingerprint())
}
