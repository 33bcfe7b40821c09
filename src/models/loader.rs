//! Frozen model loader

use crate::config::{ModelBackend, ModelConfig};
use crate::error::{PipelineError, Result};
use crate::feature_extractor::{CATEGORICAL_FEATURES, NUMERIC_FEATURES};
use crate::models::classifier::{Classifier, LogisticClassifier};
use crate::models::frozen::FrozenModel;
use crate::models::inference::OnnxClassifier;
use crate::models::transform::FeatureTransform;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn unavailable(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::ModelUnavailable(format!("{}: {}", context, e))
}

/// Loader for the frozen transform and classifier
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Self {
        Self::with_threads(1)
    }

    pub fn with_threads(onnx_threads: usize) -> Self {
        Self { onnx_threads }
    }

    /// Load the transform and classifier named by the configuration.
    ///
    /// Any failure here is fatal for the process.
    pub fn load(&self, config: &ModelConfig) -> Result<Arc<FrozenModel>> {
        let transform = self.load_transform(config.transform_path())?;
        let width = transform.output_width();

        let classifier: Box<dyn Classifier> = match config.backend {
            ModelBackend::Logistic => {
                let clf = self.load_logistic(config.classifier_path())?;
                if clf.width() != width {
                    return Err(PipelineError::ModelUnavailable(format!(
                        "classifier has {} coefficients but transform produces {} columns",
                        clf.width(),
                        width
                    )));
                }
                Box::new(clf)
            }
            ModelBackend::Onnx => Box::new(self.load_onnx(config.classifier_path(), width)?),
        };

        let model = FrozenModel::new(transform, classifier);
        info!(
            classifier = model.classifier_name(),
            inputs = ?model.feature_transform().input_columns(),
            width = width,
            "Frozen model loaded"
        );
        Ok(Arc::new(model))
    }

    /// Load and check the transform definition against the columns the feature stage produces
    pub fn load_transform<P: AsRef<Path>>(&self, path: P) -> Result<FeatureTransform> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading feature transform");

        let data = std::fs::read_to_string(path)
            .map_err(|e| unavailable(&format!("cannot read {}", path.display()), e))?;
        let transform = FeatureTransform::from_json(&data)?;

        for name in transform.numeric_names() {
            if !NUMERIC_FEATURES.contains(&name) {
                return Err(PipelineError::ModelUnavailable(format!(
                    "transform expects numeric column {:?} which is not derived",
                    name
                )));
            }
        }
        for name in transform.categorical_names() {
            if !CATEGORICAL_FEATURES.contains(&name) {
                return Err(PipelineError::ModelUnavailable(format!(
                    "transform expects categorical column {:?} which is not available",
                    name
                )));
            }
        }

        if transform.output_width() == 0 {
            return Err(PipelineError::ModelUnavailable(
                "transform produces no columns".to_string(),
            ));
        }
        Ok(transform)
    }

    fn load_logistic<P: AsRef<Path>>(&self, path: P) -> Result<LogisticClassifier> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading logistic classifier");
        let data = std::fs::read_to_string(path)
            .map_err(|e| unavailable(&format!("cannot read {}", path.display()), e))?;
        LogisticClassifier::from_json(&data)
    }

    /// Load an ONNX classifier from file
    fn load_onnx<P: AsRef<Path>>(&self, path: P, width: usize) -> Result<OnnxClassifier> {
        let path = path.as_ref();
        let (session, input_name, output_name) = self
            .open_session(path)
            .map_err(|e| unavailable(&format!("failed to load model from {:?}", path), e))?;
        Ok(OnnxClassifier::new("onnx", session, input_name, output_name, width))
    }

    fn open_session(&self, path: &Path) -> anyhow::Result<(Session, String, String)> {
        // Initialize ONNX Runtime
        ort::init().commit()?;
        info!(path = %path.display(), threads = self.onnx_threads, "Loading ONNX classifier");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)?;

        // Get input/output names
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob") || o.name.contains("output"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        info!(input = %input_name, output = %output_name, "ONNX classifier loaded");
        Ok((session, input_name, output_name))
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}
