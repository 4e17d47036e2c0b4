//! Decaying item popularity
//!
//! Scores rise on qualifying interactions and fall by a fixed amount on every
//! decay tick. Items whose score reaches zero are dropped, so the map only
//! ever holds what is currently trending.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// One entry of the trending list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendingItem {
    pub item_id: String,
    /// Raw score divided by the normalization ceiling, clamped to [0, 1]
    pub score: f64,
}

/// Shared trending score map
pub struct TrendingScoreTracker {
    scores: RwLock<HashMap<String, f64>>,
    decay_amount: f64,
    ceiling: f64,
}

impl TrendingScoreTracker {
    pub fn new(decay_amount: f64, ceiling: f64) -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
            decay_amount,
            ceiling,
        }
    }

    /// Add `amount` to an item's score; non-positive amounts are ignored
    pub async fn bump(&self, item_id: &str, amount: f64) {
        if !(amount.is_finite() && amount > 0.0) {
            debug!(item_id, amount, "Ignoring non-positive trending bump");
            return;
        }
        let mut scores = self.scores.write().await;
        *scores.entry(item_id.to_string()).or_insert(0.0) += amount;
    }

    /// Top `n` items by score, highest first (ties by item id)
    pub async fn top(&self, n: usize) -> Vec<TrendingItem> {
        let scores = self.scores.read().await;
        let mut entries: Vec<(&String, &f64)> = scores.iter().collect();
        entries.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));

        entries
            .into_iter()
            .take(n)
            .map(|(item_id, raw)| TrendingItem {
                item_id: item_id.clone(),
                score: self.normalize(*raw),
            })
            .collect()
    }

    /// Raw (unnormalized) score of an item, if it is trending
    pub async fn raw_score(&self, item_id: &str) -> Option<f64> {
        self.scores.read().await.get(item_id).copied()
    }

    /// Normalized score of an item, 0.0 when not trending
    pub async fn normalized_score(&self, item_id: &str) -> f64 {
        self.raw_score(item_id)
            .await
            .map_or(0.0, |raw| self.normalize(raw))
    }

    /// Apply one decay step; returns how many items were dropped
    pub async fn decay(&self) -> usize {
        let mut scores = self.scores.write().await;
        let before = scores.len();
        scores.retain(|_, score| {
            *score = (*score - self.decay_amount).max(0.0);
            *score > 0.0
        });
        before - scores.len()
    }

    /// Number of tracked items
    pub async fn len(&self) -> usize {
        self.scores.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn normalize(&self, raw: f64) -> f64 {
        (raw / self.ceiling).clamp(0.0, 1.0)
    }
}
