//! Experiment definitions and lifecycle states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use shoprec_common::{Error, Result};

/// Variant name returned whenever no real assignment can be made
pub const CONTROL_VARIANT: &str = "control";

/// Allowed deviation of the allocation sum from 1.0
pub const ALLOCATION_TOLERANCE: f64 = 0.001;

fn default_confidence_level() -> f64 {
    0.95
}

/// Experiment lifecycle
///
/// draft → running ⇄ paused → completed | stopped. Completed and stopped are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Stopped,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Stopped)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Draft, Running)
                | (Paused, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Paused, Completed)
                | (Draft, Stopped)
                | (Running, Stopped)
                | (Paused, Stopped)
        )
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One arm of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDefinition {
    pub name: String,
    /// Free-form variant settings; a `"weights"` object overrides ensemble weights
    #[serde(default)]
    pub config: serde_json::Value,
}

impl VariantDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: serde_json::Value::Null,
        }
    }
}

/// Unvalidated experiment definition as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExperiment {
    /// Generated when omitted
    #[serde(default)]
    pub experiment_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub variants: Vec<VariantDefinition>,
    pub traffic_allocation: HashMap<String, f64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub success_metrics: Vec<String>,
    #[serde(default)]
    pub minimum_sample_size: usize,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
}

/// A validated experiment
///
/// Only built through [`ExperimentConfig::validate`]; after that, the status
/// is the only field that changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub experiment_id: String,
    pub name: String,
    pub description: String,
    pub variants: Vec<VariantDefinition>,
    pub traffic_allocation: HashMap<String, f64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub success_metrics: Vec<String>,
    pub minimum_sample_size: usize,
    pub confidence_level: f64,
    status: ExperimentStatus,
}

impl ExperimentConfig {
    /// Validate a submission, collecting every violation
    pub fn validate(new: NewExperiment) -> Result<Self> {
        let mut errors = Vec::new();

        let experiment_id = new
            .experiment_id
            .unwrap_or_else(|| shoprec_common::uuid_utils::generate_id("exp"));
        if experiment_id.trim().is_empty() {
            errors.push("Experiment id must not be empty".to_string());
        }

        if new.variants.is_empty() {
            errors.push("At least one variant is required".to_string());
        }

        let mut variant_names = HashSet::new();
        for variant in &new.variants {
            if !variant_names.insert(variant.name.as_str()) {
                errors.push(format!("Duplicate variant name '{}'", variant.name));
            }
        }

        let total: f64 = new.traffic_allocation.values().sum();
        if (total - 1.0).abs() > ALLOCATION_TOLERANCE {
            errors.push(format!("Traffic allocation must sum to 1.0, got {}", total));
        }

        let mut out_of_range: Vec<&String> = new
            .traffic_allocation
            .iter()
            .filter(|(_, fraction)| !(0.0..=1.0).contains(*fraction))
            .map(|(name, _)| name)
            .collect();
        out_of_range.sort();
        for name in out_of_range {
            errors.push(format!("Allocation for '{}' must be within [0, 1]", name));
        }

        let allocated: HashSet<&str> = new.traffic_allocation.keys().map(String::as_str).collect();
        if allocated != variant_names {
            errors.push("Variant names in allocation don't match variant definitions".to_string());
        }

        if new.start_date >= new.end_date {
            errors.push("Start date must be before end date".to_string());
        }

        if !(new.confidence_level > 0.0 && new.confidence_level < 1.0) {
            errors.push(format!(
                "Confidence level must be within (0, 1), got {}",
                new.confidence_level
            ));
        }

        if new.success_metrics.is_empty() {
            errors.push("At least one success metric is required".to_string());
        }

        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        let mut success_metrics = Vec::with_capacity(new.success_metrics.len());
        for metric in new.success_metrics {
            if !success_metrics.contains(&metric) {
                success_metrics.push(metric);
            }
        }

        Ok(Self {
            experiment_id,
            name: new.name,
            description: new.description,
            variants: new.variants,
            traffic_allocation: new.traffic_allocation,
            start_date: new.start_date,
            end_date: new.end_date,
            success_metrics,
            minimum_sample_size: new.minimum_sample_size,
            confidence_level: new.confidence_level,
            status: ExperimentStatus::Draft,
        })
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Move to `next` if the lifecycle allows it
    pub(crate) fn transition(&mut self, next: ExperimentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "Experiment {} cannot move from {} to {}",
                self.experiment_id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Whether `now` falls inside the scheduled window
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_date && now <= self.end_date
    }

    /// Variant names in definition order
    pub fn variant_names(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(|v| v.name.as_str())
    }

    /// Free-form settings of a variant
    pub fn variant_config(&self, variant: &str) -> Option<&serde_json::Value> {
        self.variants
            .iter()
            .find(|v| v.name == variant)
            .map(|v| &v.config)
    }

    /// Map a fraction in [0, 1) onto the allocation, walking variants in
    /// definition order
    pub fn variant_for_fraction(&self, fraction: f64) -> Option<&str> {
        let mut cumulative = 0.0;
        for variant in &self.variants {
            cumulative += self
                .traffic_allocation
                .get(&variant.name)
                .copied()
                .unwrap_or(0.0);
            if fraction <= cumulative {
                return Some(variant.name.as_str());
            }
        }
        None
    }

    /// Control variant used by the analyzer: "control" if defined, else the first variant
    pub fn control_variant(&self) -> Option<&str> {
        self.variant_names()
            .find(|name| *name == CONTROL_VARIANT)
            .or_else(|| self.variant_names().next())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn new_experiment(id: &str, allocation: &[(&str, f64)]) -> NewExperiment {
        let now = shoprec_common::time::now();
        NewExperiment {
            experiment_id: Some(id.to_string()),
            name: format!("{} test", id),
            description: String::new(),
            variants: allocation.iter().map(|(name, _)| VariantDefinition::new(*name)).collect(),
            traffic_allocation: allocation.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(30),
            success_metrics: vec!["purchase".to_string()],
            minimum_sample_size: 100,
            confidence_level: 0.95,
        }
    }

    #[test]
    fn test_valid_config_starts_in_draft() {
        let config = ExperimentConfig::validate(new_experiment(
            "exp-1",
            &[("control", 0.5), ("treatment", 0.5)],
        ))
        .unwrap();
        assert_eq!(config.status(), ExperimentStatus::Draft);
        assert_eq!(config.control_variant(), Some("control"));
    }

    #[test]
    fn test_allocation_within_tolerance_is_accepted() {
        let result = ExperimentConfig::validate(new_experiment(
            "exp-1",
            &[("a", 0.3333), ("b", 0.3333), ("c", 0.3333)],
        ));
        assert!(result.is_ok());
    }

    #[test]
    fn test_all_violations_are_reported() {
        let mut new = new_experiment("exp-1", &[("control", 0.6), ("treatment", 0.6)]);
        new.variants.push(VariantDefinition::new("extra"));
        new.end_date = new.start_date;
        new.confidence_level = 1.5;

        let err = ExperimentConfig::validate(new).unwrap_err();
        let violations = err.violations();
        assert_eq!(violations.len(), 4, "{:?}", violations);
        assert!(violations[0].contains("sum to 1.0"));
        assert!(violations.iter().any(|v| v.contains("don't match")));
        assert!(violations.iter().any(|v| v.contains("Start date")));
        assert!(violations.iter().any(|v| v.contains("Confidence level")));
    }

    #[test]
    fn test_duplicate_variants_and_missing_metrics() {
        let mut new = new_experiment("exp-1", &[("a", 1.0)]);
        new.variants.push(VariantDefinition::new("a"));
        new.success_metrics.clear();

        let err = ExperimentConfig::validate(new).unwrap_err();
        assert!(err.violations().iter().any(|v| v.contains("Duplicate variant")));
        assert!(err.violations().iter().any(|v| v.contains("success metric")));
    }

    #[test]
    fn test_missing_id_is_generated() {
        let mut new = new_experiment("ignored", &[("a", 1.0)]);
        new.experiment_id = None;
        let config = ExperimentConfig::validate(new).unwrap();
        assert!(config.experiment_id.starts_with("exp-"));
    }

    #[test]
    fn test_lifecycle_transitions() {
        use ExperimentStatus::*;
        assert!(Draft.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Draft.can_transition_to(Stopped));
        assert!(!Draft.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Draft.can_transition_to(Paused));
        for terminal in [Completed, Stopped] {
            assert!(terminal.is_terminal());
            for next in [Draft, Running, Paused, Completed, Stopped] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Running.is_terminal());
    }

    #[test]
    fn test_variant_for_fraction_uses_definition_order() {
        let config = ExperimentConfig::validate(new_experiment(
            "exp-1",
            &[("first", 0.2), ("second", 0.3), ("third", 0.5)],
        ))
        .unwrap();

        assert_eq!(config.variant_for_fraction(0.0), Some("first"));
        assert_eq!(config.variant_for_fraction(0.2), Some("first"));
        assert_eq!(config.variant_for_fraction(0.2001), Some("second"));
        assert_eq!(config.variant_for_fraction(0.5), Some("second"));
        assert_eq!(config.variant_for_fraction(0.9999), Some("third"));
        assert_eq!(config.control_variant(), Some("first"));
    }

    #[test]
    fn test_variant_config_lookup() {
        let mut new = new_experiment("exp-1", &[("control", 0.5), ("treatment", 0.5)]);
        new.variants[1].config = serde_json::json!({"weights": {"cf": 2.0}});
        let config = ExperimentConfig::validate(new).unwrap();

        assert!(config.variant_config("treatment").unwrap()["weights"].is_object());
        assert_eq!(config.variant_config("control"), Some(&serde_json::Value::Null));
        assert!(config.variant_config("unknown").is_none());
    }
}
