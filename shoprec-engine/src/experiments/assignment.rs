//! Deterministic variant assignment and experiment lifecycle
//!
//! Users are bucketed by hashing `user:experiment:start_date`, so the same
//! user always lands in the same variant for the life of an experiment. The
//! first real assignment is also cached in the key-value store until the
//! experiment's end date.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use shoprec_common::kv::{self, KvStore};
use shoprec_common::{time, Error, Result};

use super::config::{ExperimentConfig, ExperimentStatus, NewExperiment, CONTROL_VARIANT};

/// Hash buckets used to derive the assignment fraction
const BUCKETS: u128 = 10_000;

/// A user's variant within an experiment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentAssignment {
    pub experiment_id: String,
    pub user_id: String,
    pub variant_name: String,
}

/// Owns experiment configs and hands out variant assignments
pub struct ExperimentEngine {
    experiments: RwLock<HashMap<String, ExperimentConfig>>,
    store: Arc<dyn KvStore>,
}

impl ExperimentEngine {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            experiments: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Validate and register a new experiment in draft status
    pub async fn create(&self, new: NewExperiment) -> Result<ExperimentConfig> {
        let mut experiments = self.experiments.write().await;

        let duplicate = new
            .experiment_id
            .as_ref()
            .filter(|id| experiments.contains_key(id.as_str()))
            .map(|id| format!("Experiment '{}' already exists", id));

        let config = match (ExperimentConfig::validate(new), duplicate) {
            (Ok(config), None) => config,
            (Ok(_), Some(duplicate)) => return Err(Error::Validation(vec![duplicate])),
            (Err(Error::Validation(mut violations)), Some(duplicate)) => {
                violations.push(duplicate);
                return Err(Error::Validation(violations));
            }
            (Err(e), _) => return Err(e),
        };

        experiments.insert(config.experiment_id.clone(), config.clone());
        drop(experiments);

        self.persist(&config).await;
        info!("Created experiment: {}", config.experiment_id);
        Ok(config)
    }

    pub async fn get(&self, experiment_id: &str) -> Result<ExperimentConfig> {
        self.experiments
            .read()
            .await
            .get(experiment_id)
            .cloned()
            .ok_or_else(|| not_found(experiment_id))
    }

    /// All experiments ordered by id
    pub async fn list(&self) -> Vec<ExperimentConfig> {
        let mut all: Vec<ExperimentConfig> = self.experiments.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.experiment_id.cmp(&b.experiment_id));
        all
    }

    /// draft | paused → running
    pub async fn start(&self, experiment_id: &str) -> Result<ExperimentConfig> {
        self.transition(experiment_id, ExperimentStatus::Running).await
    }

    /// running → paused
    pub async fn pause(&self, experiment_id: &str) -> Result<ExperimentConfig> {
        self.transition(experiment_id, ExperimentStatus::Paused).await
    }

    /// running | paused → completed
    pub async fn complete(&self, experiment_id: &str) -> Result<ExperimentConfig> {
        self.transition(experiment_id, ExperimentStatus::Completed).await
    }

    /// draft | running | paused → stopped
    pub async fn stop(&self, experiment_id: &str) -> Result<ExperimentConfig> {
        self.transition(experiment_id, ExperimentStatus::Stopped).await
    }

    async fn transition(&self, experiment_id: &str, next: ExperimentStatus) -> Result<ExperimentConfig> {
        let updated = {
            let mut experiments = self.experiments.write().await;
            let config = experiments
                .get_mut(experiment_id)
                .ok_or_else(|| not_found(experiment_id))?;
            config.transition(next)?;
            config.clone()
        };

        self.persist(&updated).await;
        info!("Experiment {} is now {}", experiment_id, next);
        Ok(updated)
    }

    /// Variant for a user, assigning one if the experiment is live
    pub async fn assign(&self, user_id: &str, experiment_id: &str) -> Result<String> {
        self.assign_at(user_id, experiment_id, time::now()).await
    }

    /// [`assign`](Self::assign) evaluated against an explicit clock
    pub async fn assign_at(&self, user_id: &str, experiment_id: &str, now: DateTime<Utc>) -> Result<String> {
        let config = self.get(experiment_id).await?;
        let key = assignment_key(experiment_id, user_id);

        if let Some(variant) = self.store.get(&key).await? {
            return Ok(variant);
        }

        // Not cached, so a later running state still produces a real assignment
        if config.status() != ExperimentStatus::Running || !config.is_active_at(now) {
            debug!(
                experiment_id,
                user_id,
                status = %config.status(),
                "Experiment not live, using control"
            );
            return Ok(CONTROL_VARIANT.to_string());
        }

        let fraction = assignment_fraction(user_id, experiment_id, config.start_date);
        let variant = match config.variant_for_fraction(fraction) {
            Some(variant) => variant.to_string(),
            None => {
                warn!(
                    experiment_id,
                    fraction, "No allocation threshold reached, using control"
                );
                return Ok(CONTROL_VARIANT.to_string());
            }
        };

        let ttl = time::remaining(now, config.end_date).unwrap_or(Duration::from_secs(1));
        self.store.set(&key, variant.clone(), Some(ttl)).await?;
        debug!(experiment_id, user_id, variant = %variant, "Assigned variant");
        Ok(variant)
    }

    /// Free-form settings of one variant
    pub async fn variant_config(&self, experiment_id: &str, variant: &str) -> Result<Option<serde_json::Value>> {
        let config = self.get(experiment_id).await?;
        Ok(config.variant_config(variant).cloned())
    }

    async fn persist(&self, config: &ExperimentConfig) {
        let key = format!("experiment:{}", config.experiment_id);
        if let Err(e) = kv::set_json(self.store.as_ref(), &key, config, None).await {
            warn!("Failed to persist experiment {}: {}", config.experiment_id, e);
        }
    }
}

fn not_found(experiment_id: &str) -> Error {
    Error::NotFound(format!("experiment {}", experiment_id))
}

fn assignment_key(experiment_id: &str, user_id: &str) -> String {
    format!("assignment:{}:{}", experiment_id, user_id)
}

/// Deterministic fraction in [0, 1) for a user within an experiment
pub fn assignment_fraction(user_id: &str, experiment_id: &str, start_date: DateTime<Utc>) -> f64 {
    let input = format!("{}:{}:{}", user_id, experiment_id, start_date.to_rfc3339());
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&digest[..16]);
    let value = u128::from_be_bytes(prefix);
    (value % BUCKETS) as f64 / BUCKETS as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::config::tests::new_experiment;
    use shoprec_common::MemoryStore;

    fn engine() -> (ExperimentEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ExperimentEngine::new(store.clone()), store)
    }

    #[test]
    fn test_fraction_is_deterministic_and_in_range() {
        let start = time::now();
        let a = assignment_fraction("u1", "exp-1", start);
        assert_eq!(a, assignment_fraction("u1", "exp-1", start));
        assert!((0.0..1.0).contains(&a));
        assert_ne!(
            assignment_fraction("u1", "exp-1", start),
            assignment_fraction("u1", "exp-1", start + chrono::Duration::seconds(1))
        );
    }

    #[tokio::test]
    async fn test_unknown_experiment_is_not_found() {
        let (engine, _) = engine();
        assert!(matches!(engine.assign("u1", "nope").await, Err(Error::NotFound(_))));
        assert!(matches!(engine.start("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_draft_experiment_assigns_control_without_caching() {
        let (engine, store) = engine();
        engine
            .create(new_experiment("exp-1", &[("a", 0.5), ("b", 0.5)]))
            .await
            .unwrap();

        assert_eq!(engine.assign("u1", "exp-1").await.unwrap(), CONTROL_VARIANT);
        assert!(store.get("assignment:exp-1:u1").await.unwrap().is_none());

        engine.start("exp-1").await.unwrap();
        let variant = engine.assign("u1", "exp-1").await.unwrap();
        assert!(variant == "a" || variant == "b");
        assert_eq!(store.get("assignment:exp-1:u1").await.unwrap(), Some(variant));
    }

    #[tokio::test]
    async fn test_assignment_survives_pause() {
        let (engine, _) = engine();
        engine
            .create(new_experiment("exp-1", &[("a", 0.5), ("b", 0.5)]))
            .await
            .unwrap();
        engine.start("exp-1").await.unwrap();

        let first = engine.assign("u1", "exp-1").await.unwrap();
        engine.pause("exp-1").await.unwrap();
        assert_eq!(engine.assign("u1", "exp-1").await.unwrap(), first);
        // Unassigned users get control while paused
        let fresh = engine.assign("someone-else", "exp-1").await.unwrap();
        assert_eq!(fresh, CONTROL_VARIANT);
    }

    #[tokio::test]
    async fn test_outside_schedule_assigns_control() {
        let (engine, _) = engine();
        let config = engine
            .create(new_experiment("exp-1", &[("a", 1.0)]))
            .await
            .unwrap();
        engine.start("exp-1").await.unwrap();

        let after_end = config.end_date + chrono::Duration::seconds(1);
        assert_eq!(engine.assign_at("u1", "exp-1", after_end).await.unwrap(), CONTROL_VARIANT);
        assert_eq!(engine.assign("u1", "exp-1").await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_duplicate_id_is_a_validation_error() {
        let (engine, _) = engine();
        engine.create(new_experiment("exp-1", &[("a", 1.0)])).await.unwrap();

        let err = engine
            .create(new_experiment("exp-1", &[("a", 1.0)]))
            .await
            .unwrap_err();
        assert!(err.violations()[0].contains("already exists"));

        let err = engine
            .create(new_experiment("exp-1", &[("a", 0.2)]))
            .await
            .unwrap_err();
        assert_eq!(err.violations().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let (engine, _) = engine();
        engine.create(new_experiment("exp-1", &[("a", 1.0)])).await.unwrap();

        assert!(matches!(engine.pause("exp-1").await, Err(Error::InvalidState(_))));
        assert!(matches!(engine.complete("exp-1").await, Err(Error::InvalidState(_))));
        engine.start("exp-1").await.unwrap();
        engine.complete("exp-1").await.unwrap();
        assert!(matches!(engine.start("exp-1").await, Err(Error::InvalidState(_))));
        assert_eq!(engine.get("exp-1").await.unwrap().status(), ExperimentStatus::Completed);
    }

    #[tokio::test]
    async fn test_config_is_persisted_to_store() {
        let (engine, store) = engine();
        engine.create(new_experiment("exp-1", &[("a", 1.0)])).await.unwrap();
        engine.start("exp-1").await.unwrap();

        let stored: ExperimentConfig = kv::get_json(store.as_ref(), "experiment:exp-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), ExperimentStatus::Running);
    }
}
