//! Prediction sources feeding the ensemble
//!
//! A source is any model that can score a (user, item) pair in [0, 1].
//! Sources fail independently; the ensemble absorbs [`SourceError`] and
//! substitutes a neutral score so one broken model never blocks a request.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::trending::TrendingScoreTracker;

/// Score substituted for a failed or absent source
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Failure of a single prediction source call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("prediction source failed: {0}")]
    Failed(String),

    #[error("prediction source timed out after {0:?}")]
    Timeout(Duration),

    #[error("prediction source returned invalid score {0}")]
    InvalidScore(f64),
}

/// A model producing per-item scores for a user
///
/// # Example
///
/// ```ignore
/// struct Collaborative { client: ModelClient }
///
/// #[async_trait]
/// impl PredictionSource for Collaborative {
///     fn name(&self) -> &str { "collaborative" }
///
///     async fn score(&self, user_id: &str, item_id: &str) -> Result<f64, SourceError> {
///         self.client.predict(user_id, item_id).await.map_err(|e| SourceError::Failed(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait PredictionSource: Send + Sync {
    /// Name used to look up the source's ensemble weight
    fn name(&self) -> &str;

    /// Score in [0, 1] for the pair
    async fn score(&self, user_id: &str, item_id: &str) -> Result<f64, SourceError>;
}

/// Fixed score table, mainly for offline evaluation and tests
pub struct StaticScores {
    name: String,
    scores: HashMap<(String, String), f64>,
    default: Option<f64>,
}

impl StaticScores {
    /// Table with no default; unknown pairs fail
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scores: HashMap::new(),
            default: None,
        }
    }

    /// Score returned for pairs not in the table
    pub fn with_default(mut self, default: f64) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_score(mut self, user_id: &str, item_id: &str, score: f64) -> Self {
        self.scores
            .insert((user_id.to_string(), item_id.to_string()), score);
        self
    }
}

#[async_trait]
impl PredictionSource for StaticScores {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, user_id: &str, item_id: &str) -> Result<f64, SourceError> {
        self.scores
            .get(&(user_id.to_string(), item_id.to_string()))
            .copied()
            .or(self.default)
            .ok_or_else(|| SourceError::Failed(format!("no score for {}/{}", user_id, item_id)))
    }
}

/// Scores items by their normalized trending score
pub struct TrendingSource {
    tracker: Arc<TrendingScoreTracker>,
}

impl TrendingSource {
    pub const NAME: &'static str = "trending";

    pub fn new(tracker: Arc<TrendingScoreTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl PredictionSource for TrendingSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn score(&self, _user_id: &str, item_id: &str) -> Result<f64, SourceError> {
        Ok(self.tracker.normalized_score(item_id).await)
    }
}
