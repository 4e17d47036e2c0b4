//! Metric sample collection and significance analysis
//!
//! Samples are appended to bounded lists in the key-value store, one list per
//! (experiment, variant, metric). `analyze` compares every variant against
//! the control with a pooled t-test and folds the comparisons into a verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use shoprec_common::kv::KvStore;
use shoprec_common::{time, Error, Result};

use super::assignment::ExperimentEngine;
use super::config::{ExperimentConfig, ExperimentStatus};
use super::stats::{self, SampleSummary};

/// One recorded metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub experiment_id: String,
    pub variant_name: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Outcome of comparing one variant against the control
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Comparison {
    Tested {
        lift: f64,
        p_value: f64,
        significant: bool,
        t_statistic: f64,
        control_mean: f64,
        variant_mean: f64,
        difference: f64,
        control_sample_size: usize,
        variant_sample_size: usize,
    },
    InsufficientData { reason: String },
}

impl Comparison {
    pub fn is_significant(&self) -> bool {
        matches!(self, Comparison::Tested { significant: true, .. })
    }

    pub fn lift(&self) -> Option<f64> {
        match self {
            Comparison::Tested { lift, .. } => Some(*lift),
            Comparison::InsufficientData { .. } => None,
        }
    }
}

/// Per-metric breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricAnalysis {
    pub control_variant: String,
    pub variants: BTreeMap<String, SampleSummary>,
    /// Keyed by the non-control variant name
    pub comparisons: BTreeMap<String, Comparison>,
}

/// Go / no-go decision across all metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Implement,
    Continue,
    Stop,
}

impl Verdict {
    /// More than half of all comparisons significantly positive → implement;
    /// at least one → continue; none → stop
    pub fn from_counts(significant_positive: usize, total_comparisons: usize) -> Self {
        if significant_positive as f64 > total_comparisons as f64 * 0.5 {
            Verdict::Implement
        } else if significant_positive > 0 {
            Verdict::Continue
        } else {
            Verdict::Stop
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallSummary {
    pub total_metrics: usize,
    pub total_comparisons: usize,
    pub significant_comparisons: usize,
    pub significant_positive: usize,
    pub significance_rate: f64,
    pub best_variant: Option<String>,
    pub best_lift: Option<f64>,
    pub recommendation: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentAnalysis {
    pub experiment_id: String,
    pub status: ExperimentStatus,
    pub confidence_level: f64,
    pub metrics: BTreeMap<String, MetricAnalysis>,
    pub overall: OverallSummary,
    pub analyzed_at: DateTime<Utc>,
}

/// Records metric samples and analyzes experiments
pub struct ExperimentAnalyzer {
    engine: Arc<ExperimentEngine>,
    store: Arc<dyn KvStore>,
    max_samples: usize,
}

impl ExperimentAnalyzer {
    pub fn new(engine: Arc<ExperimentEngine>, store: Arc<dyn KvStore>, max_samples: usize) -> Self {
        Self {
            engine,
            store,
            max_samples: max_samples.max(1),
        }
    }

    /// Record a metric value under the user's assigned variant
    pub async fn record(&self, user_id: &str, experiment_id: &str, metric: &str, value: f64) -> Result<MetricSample> {
        check_value(value)?;
        let variant_name = self.engine.assign(user_id, experiment_id).await?;
        let sample = MetricSample {
            experiment_id: experiment_id.to_string(),
            variant_name,
            metric_name: metric.to_string(),
            value,
            timestamp: time::now(),
            user_id: Some(user_id.to_string()),
        };
        self.record_sample(sample.clone()).await?;
        Ok(sample)
    }

    /// Append an already-attributed sample
    pub async fn record_sample(&self, sample: MetricSample) -> Result<()> {
        check_value(sample.value)?;
        if sample.metric_name.trim().is_empty() {
            return Err(Error::InvalidInput("metric name must not be empty".to_string()));
        }
        self.engine.get(&sample.experiment_id).await?;

        let key = samples_key(&sample.experiment_id, &sample.variant_name, &sample.metric_name);
        let len = self
            .store
            .push_bounded(&key, serde_json::to_string(&sample)?, self.max_samples)
            .await?;
        debug!(key = %key, len, value = sample.value, "Recorded metric sample");
        Ok(())
    }

    pub async fn analyze(&self, experiment_id: &str) -> Result<ExperimentAnalysis> {
        let config = self.engine.get(experiment_id).await?;
        self.analyze_config(&config).await
    }

    /// Transition to completed and return the final analysis
    pub async fn complete(&self, experiment_id: &str) -> Result<ExperimentAnalysis> {
        let config = self.engine.complete(experiment_id).await?;
        self.analyze_config(&config).await
    }

    /// Transition to stopped and return the final analysis
    pub async fn stop(&self, experiment_id: &str) -> Result<ExperimentAnalysis> {
        let config = self.engine.stop(experiment_id).await?;
        self.analyze_config(&config).await
    }

    async fn analyze_config(&self, config: &ExperimentConfig) -> Result<ExperimentAnalysis> {
        let control = config.control_variant().unwrap_or_default().to_string();
        let significance_threshold = 1.0 - config.confidence_level;

        let mut metrics = BTreeMap::new();
        for metric in &config.success_metrics {
            let mut values = BTreeMap::new();
            for variant in config.variant_names() {
                let samples = self.load_values(&config.experiment_id, variant, metric).await?;
                values.insert(variant.to_string(), samples);
            }

            let empty = Vec::new();
            let control_values = values.get(&control).unwrap_or(&empty);
            let comparisons = config
                .variant_names()
                .filter(|variant| *variant != control)
                .map(|variant| {
                    let variant_values = values.get(variant).unwrap_or(&empty);
                    (
                        variant.to_string(),
                        compare(control_values, variant_values, significance_threshold),
                    )
                })
                .collect();

            let variants = values
                .iter()
                .map(|(name, samples)| (name.clone(), stats::summarize(samples)))
                .collect();

            metrics.insert(
                metric.clone(),
                MetricAnalysis {
                    control_variant: control.clone(),
                    variants,
                    comparisons,
                },
            );
        }

        let overall = summarize_overall(&metrics);
        info!(
            experiment_id = %config.experiment_id,
            verdict = ?overall.recommendation,
            significant = overall.significant_comparisons,
            total = overall.total_comparisons,
            "Analyzed experiment"
        );

        Ok(ExperimentAnalysis {
            experiment_id: config.experiment_id.clone(),
            status: config.status(),
            confidence_level: config.confidence_level,
            metrics,
            overall,
            analyzed_at: time::now(),
        })
    }

    async fn load_values(&self, experiment_id: &str, variant: &str, metric: &str) -> Result<Vec<f64>> {
        let key = samples_key(experiment_id, variant, metric);
        let raw = self.store.list(&key).await?;
        let mut values = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<MetricSample>(&entry) {
                Ok(sample) => values.push(sample.value),
                Err(e) => warn!("Skipping unreadable sample in {}: {}", key, e),
            }
        }
        Ok(values)
    }
}

fn samples_key(experiment_id: &str, variant: &str, metric: &str) -> String {
    format!("experiment_events:{}:{}:{}", experiment_id, variant, metric)
}

fn check_value(value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("metric value must be finite, got {}", value)))
    }
}

fn compare(control: &[f64], variant: &[f64], significance_threshold: f64) -> Comparison {
    if control.is_empty() || variant.is_empty() {
        return Comparison::InsufficientData {
            reason: format!(
                "need at least one sample per side (control: {}, variant: {})",
                control.len(),
                variant.len()
            ),
        };
    }

    let Some(test) = stats::independent_t_test(control, variant) else {
        return Comparison::InsufficientData {
            reason: "not enough samples for a t-test".to_string(),
        };
    };

    let control_summary = stats::summarize(control);
    let variant_summary = stats::summarize(variant);
    let difference = variant_summary.mean - control_summary.mean;
    let lift = if control_summary.mean == 0.0 {
        0.0
    } else {
        difference / control_summary.mean
    };

    Comparison::Tested {
        lift,
        p_value: test.p_value,
        significant: test.p_value < significance_threshold,
        t_statistic: test.t_statistic,
        control_mean: control_summary.mean,
        variant_mean: variant_summary.mean,
        difference,
        control_sample_size: control.len(),
        variant_sample_size: variant.len(),
    }
}

fn summarize_overall(metrics: &BTreeMap<String, MetricAnalysis>) -> OverallSummary {
    let mut total_comparisons = 0;
    let mut significant_comparisons = 0;
    let mut significant_positive = 0;
    let mut best: Option<(String, f64)> = None;

    for analysis in metrics.values() {
        for (variant, comparison) in &analysis.comparisons {
            total_comparisons += 1;
            if !comparison.is_significant() {
                continue;
            }
            significant_comparisons += 1;
            let lift = comparison.lift().unwrap_or(0.0);
            if lift > 0.0 {
                significant_positive += 1;
            }
            if best.as_ref().map_or(true, |(_, b)| lift.abs() > b.abs()) {
                best = Some((variant.clone(), lift));
            }
        }
    }

    let significance_rate = if metrics.is_empty() {
        0.0
    } else {
        significant_comparisons as f64 / metrics.len() as f64
    };
    let (best_variant, best_lift) = match best {
        Some((variant, lift)) => (Some(variant), Some(lift)),
        None => (None, None),
    };

    OverallSummary {
        total_metrics: metrics.len(),
        total_comparisons,
        significant_comparisons,
        significant_positive,
        significance_rate,
        best_variant,
        best_lift,
        recommendation: Verdict::from_counts(significant_positive, total_comparisons),
    }
}
