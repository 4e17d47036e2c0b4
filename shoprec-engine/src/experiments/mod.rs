//! Experiment configuration, assignment and analysis

pub mod analyzer;
pub mod assignment;
pub mod config;
pub mod stats;

pub use analyzer::{Comparison, ExperimentAnalysis, ExperimentAnalyzer, MetricSample, Verdict};
pub use assignment::{ExperimentAssignment, ExperimentEngine};
pub use config::{ExperimentConfig, ExperimentStatus, NewExperiment, VariantDefinition, CONTROL_VARIANT};
