//! Composed recommendation service
//!
//! Owns one instance of every component and wires them together. All state
//! is injected here at construction; nothing is global, so tests can run any
//! number of independent services side by side.

use std::collections::BTreeMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use shoprec_common::config::EngineConfig;
use shoprec_common::{Error, KvStore, MemoryStore, Result, UserEvent};

use crate::catalog::{Catalog, MemoryCatalog};
use crate::ensemble::{EnsembleScoringCache, RecommendationList, ScoringContext};
use crate::experiments::{
    ExperimentAnalysis, ExperimentAnalyzer, ExperimentAssignment, ExperimentConfig, ExperimentEngine,
    ExperimentStatus, MetricSample, NewExperiment,
};
use crate::ingest::EventIngestionPipeline;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::session::SessionWindowStore;
use crate::sources::{PredictionSource, TrendingSource};
use crate::tasks::BackgroundTasks;
use crate::trending::{TrendingItem, TrendingScoreTracker};

/// Builder for [`RecommendationService`]
pub struct ServiceBuilder {
    config: EngineConfig,
    catalog: Option<Arc<dyn Catalog>>,
    store: Option<Arc<dyn KvStore>>,
    sources: Vec<Arc<dyn PredictionSource>>,
    trending_source: bool,
}

impl ServiceBuilder {
    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register an external prediction source
    pub fn source(mut self, source: Arc<dyn PredictionSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Also score candidates by their normalized trending score
    pub fn trending_source(mut self) -> Self {
        self.trending_source = true;
        self
    }

    pub fn build(self) -> Result<RecommendationService> {
        self.config.validate()?;
        let config = self.config;

        let catalog: Arc<dyn Catalog> = match self.catalog {
            Some(catalog) => catalog,
            None => Arc::new(MemoryCatalog::new(Vec::<String>::new())),
        };
        let store: Arc<dyn KvStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let metrics = Arc::new(EngineMetrics::new());

        let sessions = Arc::new(SessionWindowStore::new(
            config.session.capacity,
            config.session_retention(),
        ));
        let trending = Arc::new(TrendingScoreTracker::new(
            config.trending.decay_amount,
            config.trending.normalization_ceiling,
        ));

        let mut ensemble = EnsembleScoringCache::new(
            &config,
            catalog.clone(),
            trending.clone(),
            store.clone(),
            metrics.clone(),
        );
        if self.trending_source {
            ensemble = ensemble.with_source(Arc::new(TrendingSource::new(trending.clone())));
        }
        for source in self.sources {
            ensemble = ensemble.with_source(source);
        }
        let ensemble = Arc::new(ensemble);
        info!("Prediction sources: {:?}", ensemble.source_names());

        let pipeline = EventIngestionPipeline::new(
            sessions.clone(),
            trending.clone(),
            ensemble.clone(),
            catalog,
            metrics.clone(),
            config.ensemble.realtime_count,
        );

        let experiments = Arc::new(ExperimentEngine::new(store.clone()));
        let analyzer = ExperimentAnalyzer::new(
            experiments.clone(),
            store.clone(),
            config.experiments.max_samples_per_key,
        );

        Ok(RecommendationService {
            config,
            store,
            sessions,
            trending,
            ensemble,
            pipeline,
            experiments,
            analyzer,
            metrics,
        })
    }
}

/// Point-in-time counts of live service state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub trending_items: usize,
    pub active_users: usize,
    pub experiments: usize,
    pub running_experiments: usize,
}

/// Every core component behind one facade
pub struct RecommendationService {
    config: EngineConfig,
    store: Arc<dyn KvStore>,
    sessions: Arc<SessionWindowStore>,
    trending: Arc<TrendingScoreTracker>,
    ensemble: Arc<EnsembleScoringCache>,
    pipeline: EventIngestionPipeline,
    experiments: Arc<ExperimentEngine>,
    analyzer: ExperimentAnalyzer,
    metrics: Arc<EngineMetrics>,
}

impl RecommendationService {
    pub fn builder(config: EngineConfig) -> ServiceBuilder {
        ServiceBuilder {
            config,
            catalog: None,
            store: None,
            sources: Vec::new(),
            trending_source: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start trending decay and session sweep loops
    pub fn spawn_background_tasks(&self) -> BackgroundTasks {
        BackgroundTasks::spawn(
            self.trending.clone(),
            self.sessions.clone(),
            self.store.clone(),
            self.config.trending_decay_interval(),
            self.config.session_sweep_interval(),
        )
    }

    // ========================================================================
    // Events and recommendations
    // ========================================================================

    /// Ingest an event; experiment metadata on the event selects the scoring context
    ///
    /// Invalid events are rejected before the experiment assignment is touched.
    pub async fn ingest(&self, event: UserEvent) -> Result<RecommendationList> {
        if let Err(e) = event.validate() {
            self.metrics.record_event_rejected();
            return Err(e);
        }

        let ctx = match (&event.experiment_id, &event.variant) {
            (Some(experiment_id), Some(variant)) => self.context_for_variant(experiment_id, variant).await,
            (Some(experiment_id), None) => self.context_for_user(&event.user_id, experiment_id).await,
            _ => ScoringContext::default(),
        };
        self.pipeline.ingest_with_context(event, &ctx).await
    }

    /// Ranked recommendations, optionally shaped by an experiment variant
    ///
    /// Only a blank user id fails; every other problem degrades the list.
    pub async fn recommendations(
        &self,
        user_id: &str,
        count: usize,
        experiment_id: Option<&str>,
    ) -> Result<RecommendationList> {
        if user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id must not be empty".to_string()));
        }
        let ctx = match experiment_id {
            Some(experiment_id) => self.context_for_user(user_id, experiment_id).await,
            None => ScoringContext::default(),
        };
        let count = self.clamp_count(count);
        Ok(self.ensemble.get_recommendations(user_id, count, &ctx).await)
    }

    /// Top trending items, at most `ensemble.max_count`
    pub async fn trending(&self, count: usize) -> Vec<TrendingItem> {
        self.trending.top(self.clamp_count(count)).await
    }

    fn clamp_count(&self, count: usize) -> usize {
        count.min(self.config.ensemble.max_count)
    }

    pub async fn recent_events(&self, limit: usize) -> Vec<UserEvent> {
        self.pipeline.recent_events(limit).await
    }

    pub async fn session(&self, user_id: &str, limit: usize) -> Vec<UserEvent> {
        self.sessions.recent(user_id, limit).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn status(&self) -> ServiceStatus {
        let experiments = self.experiments.list().await;
        ServiceStatus {
            trending_items: self.trending.len().await,
            active_users: self.sessions.user_count().await,
            experiments: experiments.len(),
            running_experiments: experiments
                .iter()
                .filter(|e| e.status() == ExperimentStatus::Running)
                .count(),
        }
    }

    async fn context_for_user(&self, user_id: &str, experiment_id: &str) -> ScoringContext {
        match self.experiments.assign(user_id, experiment_id).await {
            Ok(variant) => self.context_for_variant(experiment_id, &variant).await,
            Err(e) => {
                warn!(
                    "Ignoring experiment {} for {}: {}",
                    experiment_id, user_id, e
                );
                ScoringContext::default()
            }
        }
    }

    async fn context_for_variant(&self, experiment_id: &str, variant: &str) -> ScoringContext {
        let variant_config = match self.experiments.variant_config(experiment_id, variant).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring experiment {}: {}", experiment_id, e);
                return ScoringContext::default();
            }
        };

        let weights = variant_config.as_ref().and_then(variant_weights);
        debug!(experiment_id, variant, ?weights, "Resolved scoring context");
        ScoringContext {
            experiment_id: Some(experiment_id.to_string()),
            variant: Some(variant.to_string()),
            weights,
        }
    }

    // ========================================================================
    // Experiments
    // ========================================================================

    pub async fn create_experiment(&self, new: NewExperiment) -> Result<ExperimentConfig> {
        self.experiments.create(new).await
    }

    pub async fn experiment(&self, experiment_id: &str) -> Result<ExperimentConfig> {
        self.experiments.get(experiment_id).await
    }

    pub async fn list_experiments(&self) -> Vec<ExperimentConfig> {
        self.experiments.list().await
    }

    pub async fn start_experiment(&self, experiment_id: &str) -> Result<ExperimentConfig> {
        self.experiments.start(experiment_id).await
    }

    pub async fn pause_experiment(&self, experiment_id: &str) -> Result<ExperimentConfig> {
        self.experiments.pause(experiment_id).await
    }

    pub async fn complete_experiment(&self, experiment_id: &str) -> Result<ExperimentAnalysis> {
        self.analyzer.complete(experiment_id).await
    }

    pub async fn stop_experiment(&self, experiment_id: &str) -> Result<ExperimentAnalysis> {
        self.analyzer.stop(experiment_id).await
    }

    pub async fn assign(&self, user_id: &str, experiment_id: &str) -> Result<ExperimentAssignment> {
        if user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id must not be empty".to_string()));
        }
        let variant_name = self.experiments.assign(user_id, experiment_id).await?;
        Ok(ExperimentAssignment {
            experiment_id: experiment_id.to_string(),
            user_id: user_id.to_string(),
            variant_name,
        })
    }

    pub async fn record_metric(
        &self,
        user_id: &str,
        experiment_id: &str,
        metric: &str,
        value: f64,
    ) -> Result<MetricSample> {
        if user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id must not be empty".to_string()));
        }
        self.analyzer.record(user_id, experiment_id, metric, value).await
    }

    /// Record a sample already attributed to a variant
    pub async fn record_sample(&self, sample: MetricSample) -> Result<()> {
        self.analyzer.record_sample(sample).await
    }

    pub async fn analyze(&self, experiment_id: &str) -> Result<ExperimentAnalysis> {
        self.analyzer.analyze(experiment_id).await
    }
}

/// Non-negative finite numbers under a variant config's `"weights"` object
fn variant_weights(config: &serde_json::Value) -> Option<BTreeMap<String, f64>> {
    let weights: BTreeMap<String, f64> = config
        .get("weights")?
        .as_object()?
        .iter()
        .filter_map(|(name, weight)| {
            let weight = weight.as_f64()?;
            (weight.is_finite() && weight >= 0.0).then(|| (name.clone(), weight))
        })
        .collect();
    (!weights.is_empty()).then_some(weights)
}
