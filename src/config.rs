//! Configuration management for the risk scoring pipeline

use anyhow::{bail, Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Classifier backend behind the frozen feature transform
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// ONNX classifier executed through ONNX Runtime
    #[default]
    Onnx,
    /// Logistic regression coefficients stored as JSON
    Logistic,
}

/// What happens to rows carrying an unparseable value
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRowPolicy {
    /// Fail the whole batch with a validation error
    #[default]
    Reject,
    /// Drop offending rows and score the remainder
    Drop,
}

/// How flagged anomalies are explained
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyExplainStrategy {
    /// Attribution against a ridge surrogate of the anomaly score
    #[default]
    Surrogate,
    /// Batch-quantile rule checks
    Rules,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub explanation: ExplanationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming scoring requests
    pub request_subject: String,
    /// Subject for scoring outcomes
    pub result_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            request_subject: "scoring.requests".to_string(),
            result_subject: "scoring.results".to_string(),
        }
    }
}

/// Frozen model configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory containing the model artifacts
    pub models_dir: String,
    #[serde(default)]
    pub backend: ModelBackend,
    /// Feature transform definition (JSON)
    #[serde(default = "default_transform_file")]
    pub transform_file: String,
    /// Classifier artifact; `.onnx` or `.json` depending on backend
    #[serde(default = "default_classifier_file")]
    pub classifier_file: String,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_transform_file() -> String {
    "transform.json".to_string()
}

fn default_classifier_file() -> String {
    "classifier.onnx".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

impl ModelConfig {
    pub fn transform_path(&self) -> PathBuf {
        Path::new(&self.models_dir).join(&self.transform_file)
    }

    pub fn classifier_path(&self) -> PathBuf {
        Path::new(&self.models_dir).join(&self.classifier_file)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            backend: ModelBackend::Onnx,
            transform_file: default_transform_file(),
            classifier_file: default_classifier_file(),
            onnx_threads: default_onnx_threads(),
        }
    }
}

/// Scoring and ranking parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Probability at or above which a record is marked as fraud
    pub fraud_threshold: f64,
    /// Expected outlier fraction; records above the (1 - contamination) quantile are flagged
    pub contamination: f64,
    /// Isolation trees per batch
    pub n_trees: usize,
    /// Rows sampled per tree (capped at batch size)
    pub max_samples: usize,
    /// Seed for the per-batch forest
    pub seed: u64,
    /// Weight of the normalized anomaly score in the review priority
    pub anomaly_weight: f64,
    /// Weight of the fraud probability in the review priority
    pub fraud_weight: f64,
    /// Guard added to the min-max range
    pub epsilon: f64,
}

impl ScoringConfig {
    pub fn anomaly_quantile(&self) -> f64 {
        1.0 - self.contamination
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            fraud_threshold: 0.65,
            contamination: 0.02,
            n_trees: 100,
            max_samples: 256,
            seed: 42,
            anomaly_weight: 0.7,
            fraud_weight: 0.3,
            epsilon: 1e-9,
        }
    }
}

/// Feature engineering options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Channel value that marks an online transaction
    pub online_channel: String,
    /// Compare the channel exactly (true) or case-insensitively (false)
    pub channel_case_sensitive: bool,
    /// First hour of the off-hours window
    pub odd_hours_start: u32,
    /// Last hour (inclusive) of the off-hours window
    pub odd_hours_end: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            online_channel: "ONLINE".to_string(),
            channel_case_sensitive: true,
            odd_hours_start: 0,
            odd_hours_end: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ValidationConfig {
    #[serde(default)]
    pub invalid_rows: InvalidRowPolicy,
}

/// Explanation options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplanationConfig {
    #[serde(default)]
    pub anomaly_strategy: AnomalyExplainStrategy,
    /// Maximum reasons per verdict
    pub max_reasons: usize,
    /// L2 penalty of the surrogate regression
    pub surrogate_ridge: f64,
    /// Batch quantile a value must reach to trigger a rule
    pub rule_quantile: f64,
}

impl Default for ExplanationConfig {
    fn default() -> Self {
        Self {
            anomaly_strategy: AnomalyExplainStrategy::Surrogate,
            max_reasons: 3,
            surrogate_ridge: 1.0,
            rule_quantile: 0.95,
        }
    }
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the local artifact store
    pub root: String,
    /// Delete the input artifact as soon as it has been read
    pub delete_input_after_read: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "storage".to_string(),
            delete_input_after_read: true,
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent pipeline invocations
    pub workers: usize,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.scoring;
        if !(0.0..=1.0).contains(&s.fraud_threshold) {
            bail!("scoring.fraud_threshold must be within [0, 1], got {}", s.fraud_threshold);
        }
        if !(s.contamination > 0.0 && s.contamination <= 0.5) {
            bail!("scoring.contamination must be within (0, 0.5], got {}", s.contamination);
        }
        if s.n_trees == 0 || s.max_samples == 0 {
            bail!("scoring.n_trees and scoring.max_samples must be positive");
        }
        if s.anomaly_weight < 0.0 || s.fraud_weight < 0.0 {
            bail!("scoring weights must be non-negative");
        }
        if s.epsilon <= 0.0 {
            bail!("scoring.epsilon must be positive");
        }
        if self.explanation.max_reasons == 0 {
            bail!("explanation.max_reasons must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.explanation.rule_quantile) {
            bail!("explanation.rule_quantile must be within [0, 1]");
        }
        if self.features.odd_hours_start > 23 || self.features.odd_hours_end > 23 {
            bail!("features.odd_hours_* must be hours of day (0-23)");
        }
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.scoring.fraud_threshold, 0.65);
        assert_eq!(config.scoring.contamination, 0.02);
        assert!((config.scoring.anomaly_quantile() - 0.98).abs() < 1e-12);
        assert_eq!(config.scoring.anomaly_weight, 0.7);
        assert_eq!(config.scoring.fraud_weight, 0.3);
        assert_eq!(config.validation.invalid_rows, InvalidRowPolicy::Reject);
        assert_eq!(config.explanation.anomaly_strategy, AnomalyExplainStrategy::Surrogate);
        assert_eq!(config.model.backend, ModelBackend::Onnx);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = AppConfig::default();
        config.scoring.fraud_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scoring.contamination = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[model]
models_dir = "artifacts"
backend = "logistic"
classifier_file = "classifier.json"

[validation]
invalid_rows = "drop"

[features]
online_channel = "online"
channel_case_sensitive = false
odd_hours_start = 0
odd_hours_end = 4
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.model.backend, ModelBackend::Logistic);
        assert_eq!(config.model.classifier_path(), Path::new("artifacts/classifier.json"));
        assert_eq!(config.validation.invalid_rows, InvalidRowPolicy::Drop);
        assert!(!config.features.channel_case_sensitive);
        assert_eq!(config.scoring.n_trees, 100);
    }
}
