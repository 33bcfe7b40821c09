//! Classifier capability over the transformed feature matrix

use crate::error::{PipelineError, Result};
use crate::numeric::finite_or;
use ndarray::{Array1, Array2};
use serde::Deserialize;

/// Frozen probabilistic classifier.
///
/// Implementations are immutable after load and safe to call from
/// concurrent pipeline invocations.
pub trait Classifier: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Fraud-class probability per row
    fn predict_proba(&self, matrix: &Array2<f64>) -> Result<Vec<f64>>;

    /// Per-row, per-column contribution to the fraud score.
    ///
    /// Positive values push towards fraud. Columns at their baseline value
    /// (zero after scaling, inactive indicators) contribute nothing.
    fn attribute(&self, matrix: &Array2<f64>) -> Result<Array2<f64>>;
}

/// Logistic regression stored as JSON coefficients over the transformed columns
#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    intercept: f64,
    coefficients: Array1<f64>,
}

#[derive(Deserialize)]
struct LogisticArtifact {
    intercept: f64,
    coefficients: Vec<f64>,
}

impl LogisticClassifier {
    pub fn new(intercept: f64, coefficients: Vec<f64>) -> Self {
        Self {
            intercept,
            coefficients: Array1::from(coefficients),
        }
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let artifact: LogisticArtifact = serde_json::from_str(data).map_err(|e| {
            PipelineError::ModelUnavailable(format!("invalid logistic classifier: {}", e))
        })?;
        if artifact.coefficients.iter().any(|c| !c.is_finite()) || !artifact.intercept.is_finite() {
            return Err(PipelineError::ModelUnavailable(
                "logistic classifier has non-finite coefficients".to_string(),
            ));
        }
        Ok(Self::new(artifact.intercept, artifact.coefficients))
    }

    pub fn width(&self) -> usize {
        self.coefficients.len()
    }

    fn check_width(&self, matrix: &Array2<f64>) -> Result<()> {
        if matrix.ncols() != self.width() {
            return Err(PipelineError::Model(format!(
                "classifier expects {} columns, got {}",
                self.width(),
                matrix.ncols()
            )));
        }
        Ok(())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Classifier for LogisticClassifier {
    fn name(&self) -> &str {
        "logistic"
    }

    fn predict_proba(&self, matrix: &Array2<f64>) -> Result<Vec<f64>> {
        self.check_width(matrix)?;
        let logits = matrix.dot(&self.coefficients) + self.intercept;
        Ok(logits
            .iter()
            .map(|&z| finite_or(sigmoid(z), 0.0).clamp(0.0, 1.0))
            .collect())
    }

    /// Exact for a linear model: coefficient times offset from the zero baseline, in log-odds
    fn attribute(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(matrix)?;
        let mut out = matrix.clone();
        for mut row in out.rows_mut() {
            row.zip_mut_with(&self.coefficients, |x, &w| *x = finite_or(*x * w, 0.0));
        }
        Ok(out)
    }
}
