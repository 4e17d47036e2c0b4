//! Configuration loading and config file resolution
//!
//! Every section carries `#[serde(default)]`, so a partial TOML file only
//! overrides what it names. A missing config file is not fatal: the service
//! logs a warning and starts on compiled defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::time::secs_to_duration;
use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SHOPREC_CONFIG";

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub trending: TrendingConfig,
    pub cache: CacheConfig,
    pub experiments: ExperimentSettings,
    pub ensemble: EnsembleConfig,
    pub logging: LoggingConfig,
    /// Optional TOML file seeding the in-process catalog
    pub catalog_path: Option<PathBuf>,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5750,
        }
    }
}

/// Per-user session window bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Most-recent events retained per user
    pub capacity: usize,
    /// Events older than this are evicted
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            retention_secs: 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
        }
    }
}

/// Trending score decay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendingConfig {
    pub decay_interval_secs: u64,
    pub decay_amount: f64,
    /// Raw score that maps to a normalized score of 1.0
    pub normalization_ceiling: f64,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        Self {
            decay_interval_secs: 60,
            decay_amount: 1.0,
            normalization_ceiling: 100.0,
        }
    }
}

/// Recommendation cache lifetimes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub personalized_ttl_secs: u64,
    pub fallback_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            personalized_ttl_secs: 30 * 60,
            fallback_ttl_secs: 60 * 60,
        }
    }
}

/// Experiment metric retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    /// Samples kept per (experiment, variant, metric)
    pub max_samples_per_key: usize,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            max_samples_per_key: 10_000,
        }
    }
}

/// Ensemble weighting and source fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Prediction source name → weight (need not sum to 1)
    pub weights: BTreeMap<String, f64>,
    pub source_timeout_ms: u64,
    /// Size of the list returned from event ingestion
    pub realtime_count: usize,
    /// Upper bound on requested list sizes
    pub max_count: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights: BTreeMap::new(),
            source_timeout_ms: 250,
            realtime_count: 10,
            max_count: 100,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load configuration following the resolution order:
    /// 1. Explicit path (command-line argument or `SHOPREC_CONFIG`)
    /// 2. User config file (`~/.config/shoprec/config.toml`)
    /// 3. System config file (`/etc/shoprec/config.toml`)
    /// 4. Compiled defaults
    ///
    /// An explicit path that does not exist is an error; missing implicit
    /// files fall through to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            info!("Loading configuration from {}", path.display());
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check every setting, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.session.capacity == 0 {
            problems.push("session.capacity must be greater than 0".to_string());
        }
        if self.session.retention_secs == 0 {
            problems.push("session.retention_secs must be greater than 0".to_string());
        }
        if self.session.sweep_interval_secs == 0 {
            problems.push("session.sweep_interval_secs must be greater than 0".to_string());
        }
        if self.trending.decay_interval_secs == 0 {
            problems.push("trending.decay_interval_secs must be greater than 0".to_string());
        }
        if !(self.trending.decay_amount.is_finite() && self.trending.decay_amount > 0.0) {
            problems.push("trending.decay_amount must be a positive number".to_string());
        }
        if !(self.trending.normalization_ceiling.is_finite()
            && self.trending.normalization_ceiling > 0.0)
        {
            problems.push("trending.normalization_ceiling must be a positive number".to_string());
        }
        if self.cache.personalized_ttl_secs == 0 || self.cache.fallback_ttl_secs == 0 {
            problems.push("cache TTLs must be greater than 0".to_string());
        }
        if self.experiments.max_samples_per_key == 0 {
            problems.push("experiments.max_samples_per_key must be greater than 0".to_string());
        }
        if self.ensemble.max_count == 0 {
            problems.push("ensemble.max_count must be greater than 0".to_string());
        }
        if self.ensemble.source_timeout_ms == 0 {
            problems.push("ensemble.source_timeout_ms must be greater than 0".to_string());
        }
        for (name, weight) in &self.ensemble.weights {
            if !(weight.is_finite() && *weight >= 0.0) {
                problems.push(format!(
                    "ensemble.weights.{} must be a non-negative number",
                    name
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    pub fn session_retention(&self) -> Duration {
        secs_to_duration(self.session.retention_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        secs_to_duration(self.session.sweep_interval_secs)
    }

    pub fn trending_decay_interval(&self) -> Duration {
        secs_to_duration(self.trending.decay_interval_secs)
    }

    pub fn personalized_ttl(&self) -> Duration {
        secs_to_duration(self.cache.personalized_ttl_secs)
    }

    pub fn fallback_ttl(&self) -> Duration {
        secs_to_duration(self.cache.fallback_ttl_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.ensemble.source_timeout_ms)
    }
}

/// First existing platform config file, if any
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("shoprec").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/shoprec/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}
