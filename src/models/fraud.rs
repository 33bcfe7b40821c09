//! Fraud classifier adapter.
//!
//! Assembles exactly the inputs the frozen transform was trained on, in its
//! column order, and applies the fixed decision threshold.

use crate::error::{PipelineError, Result};
use crate::feature_extractor::{categorical, EngineeredBatch};
use crate::models::frozen::FrozenModel;
use crate::models::transform::RawFeatures;
use ndarray::Array2;
use std::sync::Arc;
use tracing::{debug, warn};

/// Classifier output for a batch
#[derive(Debug, Clone)]
pub struct FraudScores {
    pub probabilities: Vec<f64>,
    pub is_fraud: Vec<bool>,
    /// Transformed feature matrix, reused by the anomaly stage and explanations
    pub matrix: Array2<f64>,
}

pub struct FraudClassifier {
    model: Arc<FrozenModel>,
    threshold: f64,
}

impl FraudClassifier {
    pub fn new(model: Arc<FrozenModel>, threshold: f64) -> Self {
        Self { model, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn model(&self) -> &FrozenModel {
        &self.model
    }

    /// Build the raw input frame in the transform's training column order
    pub fn assemble(&self, batch: &EngineeredBatch) -> Result<RawFeatures> {
        let transform = self.model.feature_transform();
        let numeric_cols: Vec<&str> = transform.numeric_names().collect();
        let categorical_cols: Vec<&str> = transform.categorical_names().collect();

        let mut numeric = Array2::<f64>::zeros((batch.len(), numeric_cols.len()));
        let mut cats = Vec::with_capacity(batch.len());

        for (i, row) in batch.rows.iter().enumerate() {
            for (j, name) in numeric_cols.iter().enumerate() {
                numeric[[i, j]] = row.features.numeric(&row.record, name).ok_or_else(|| {
                    PipelineError::Schema(format!("model input {:?} is not a derived feature", name))
                })?;
            }
            let values = categorical_cols
                .iter()
                .map(|name| {
                    categorical(&row.record, name).ok_or_else(|| {
                        PipelineError::Schema(format!("model input {:?} is not a raw column", name))
                    })
                })
                .collect::<Result<Vec<String>>>()?;
            cats.push(values);
        }

        Ok(RawFeatures {
            numeric,
            categorical: cats,
        })
    }

    /// Score a batch: probabilities, thresholded verdicts and the transformed matrix
    pub fn score(&self, batch: &EngineeredBatch) -> Result<FraudScores> {
        let raw = self.assemble(batch)?;
        let matrix = self.model.transform(&raw)?;
        let raw_probs = self.model.predict_proba(&matrix)?;

        if raw_probs.len() != batch.len() {
            return Err(PipelineError::Model(format!(
                "classifier returned {} probabilities for {} rows",
                raw_probs.len(),
                batch.len()
            )));
        }

        let mut clamped = 0;
        let probabilities: Vec<f64> = raw_probs
            .into_iter()
            .map(|p| {
                if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                    clamped += 1;
                }
                if p.is_finite() {
                    p.clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect();
        if clamped > 0 {
            warn!(rows = clamped, "Classifier produced out-of-range probabilities; clamped");
        }

        let is_fraud: Vec<bool> = probabilities.iter().map(|&p| p >= self.threshold).collect();

        debug!(
            classifier = self.model.classifier_name(),
            rows = batch.len(),
            flagged = is_fraud.iter().filter(|&&f| f).count(),
            threshold = self.threshold,
            "Fraud scoring complete"
        );

        Ok(FraudScores {
            probabilities,
            is_fraud,
            matrix,
        })
    }
}
