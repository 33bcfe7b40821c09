//! ONNX Runtime classifier backend

use crate::error::{PipelineError, Result};
use crate::models::classifier::Classifier;
use ndarray::Array2;
use ort::memory::Allocator;
use ort::session::Session;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Loaded ONNX classifier.
///
/// ONNX Runtime needs exclusive access to run a session, so the session sits
/// behind a mutex; the classifier itself is never modified after load.
pub struct OnnxClassifier {
    /// Model name
    name: String,
    session: Mutex<Session>,
    /// Input name for the model
    input_name: String,
    /// Output name for probabilities
    output_name: String,
    /// Expected width of the input matrix
    width: usize,
}

fn model_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Model(e.to_string())
}

impl OnnxClassifier {
    pub fn new(
        name: &str,
        session: Session,
        input_name: String,
        output_name: String,
        width: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
            width,
        }
    }

    /// Run the session on a full batch
    fn run(&self, matrix: &Array2<f64>) -> Result<Vec<f64>> {
        if matrix.ncols() != self.width {
            return Err(PipelineError::Model(format!(
                "classifier expects {} columns, got {}",
                self.width,
                matrix.ncols()
            )));
        }
        let rows = matrix.nrows();
        if rows == 0 {
            return Ok(Vec::new());
        }

        // Prepare input tensor - shape [rows, num_features]
        let shape = vec![rows as i64, self.width as i64];
        let data: Vec<f32> = matrix.iter().map(|&v| v as f32).collect();
        let input_tensor = Tensor::from_array((shape, data)).map_err(model_err)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| PipelineError::Model(format!("Lock error: {}", e)))?;

        let outputs = session
            .run(ort::inputs![&self.input_name => input_tensor])
            .map_err(model_err)?;

        let probs = self.extract_probabilities(&outputs, rows)?;
        Ok(probs
            .into_iter()
            .map(|p| if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 })
            .collect())
    }

    /// Extract fraud probabilities from model output.
    /// Handles tensor outputs ([n, 2] or [n, 1]) and seq(map(int64, float)) outputs
    fn extract_probabilities(
        &self,
        outputs: &ort::session::SessionOutputs,
        rows: usize,
    ) -> Result<Vec<f64>> {
        if let Some(output) = outputs.get(&self.output_name) {
            let dtype = output.dtype();

            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                let dims: Vec<i64> = shape.iter().copied().collect();
                return probs_from_tensor(&dims, data, rows);
            }

            if DynSequenceValueType::can_downcast(&dtype) {
                return self.probs_from_sequence_map(output, rows);
            }
        }

        // Fallback: iterate all outputs and try extraction
        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }

            let dtype = output.dtype();

            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                let dims: Vec<i64> = shape.iter().copied().collect();
                debug!(model = %self.name, output = %name, "Extracting from fallback tensor output");
                return probs_from_tensor(&dims, data, rows);
            }

            if DynSequenceValueType::can_downcast(&dtype) {
                if let Ok(probs) = self.probs_from_sequence_map(&output, rows) {
                    return Ok(probs);
                }
            }
        }

        warn!(model = %self.name, "Could not locate a probability output");
        Err(PipelineError::Model(format!(
            "model {} produced no probability output",
            self.name
        )))
    }

    /// Probabilities from seq(map(int64, float)), as exported for boosted tree models
    fn probs_from_sequence_map(&self, output: &ort::value::DynValue, rows: usize) -> Result<Vec<f64>> {
        let allocator = Allocator::default();

        let sequence = output
            .downcast_ref::<DynSequenceValueType>()
            .map_err(|e| PipelineError::Model(format!("Failed to downcast to sequence: {}", e)))?;

        let maps = sequence
            .try_extract_sequence::<DynMapValueType>(&allocator)
            .map_err(model_err)?;

        if maps.len() != rows {
            return Err(PipelineError::Model(format!(
                "sequence output has {} entries for {} rows",
                maps.len(),
                rows
            )));
        }

        let mut probs = Vec::with_capacity(rows);
        for map_value in &maps {
            let kv_pairs = map_value.try_extract_key_values::<i64, f32>().map_err(model_err)?;

            let p = fraud_from_class_map(&kv_pairs)
                .ok_or_else(|| PipelineError::Model("No probability found in map".to_string()))?;
            probs.push(p);
        }
        debug!(model = %self.name, rows = rows, "Extracted from seq(map)");
        Ok(probs)
    }
}

/// Fraud probability from one class -> probability map; falls back to the
/// complement of class 0
fn fraud_from_class_map(pairs: &[(i64, f32)]) -> Option<f64> {
    let class = |id: i64| pairs.iter().find(|(c, _)| *c == id).map(|(_, p)| *p as f64);
    class(1).or_else(|| class(0).map(|p| 1.0 - p))
}

/// Fraud probabilities from a dense tensor output.
///
/// `[rows, classes]` takes class 1 (class 0 when there is a single column);
/// `[rows]` is already the fraud probability.
fn probs_from_tensor(dims: &[i64], data: &[f32], rows: usize) -> Result<Vec<f64>> {
    let columns = match dims {
        [n, c] if *n as usize == rows && *c > 0 => *c as usize,
        [n] if *n as usize == rows => 1,
        _ => {
            return Err(PipelineError::Model(format!(
                "unexpected probability shape {:?} for {} rows",
                dims, rows
            )))
        }
    };
    if data.len() < rows * columns {
        return Err(PipelineError::Model(format!(
            "probability tensor holds {} values, expected {}",
            data.len(),
            rows * columns
        )));
    }

    let class = if columns >= 2 { 1 } else { 0 };
    Ok((0..rows).map(|i| data[i * columns + class] as f64).collect())
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict_proba(&self, matrix: &Array2<f64>) -> Result<Vec<f64>> {
        self.run(matrix)
    }

    /// Occlusion attribution: probability drop when a column is reset to its zero baseline
    fn attribute(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        let base = self.run(matrix)?;
        let mut attributions = Array2::<f64>::zeros(matrix.raw_dim());

        for j in 0..matrix.ncols() {
            if matrix.column(j).iter().all(|&v| v == 0.0) {
                continue;
            }
            let mut occluded = matrix.clone();
            occluded.column_mut(j).fill(0.0);
            let probs = self.run(&occluded)?;
            for (i, (&p, &q)) in base.iter().zip(probs.iter()).enumerate() {
                attributions[[i, j]] = p - q;
            }
        }
        Ok(attributions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_class_tensor_takes_fraud_column() {
        let probs = probs_from_tensor(&[3, 2], &[0.9, 0.1, 0.25, 0.75, 0.5, 0.5], 3).unwrap();
        assert_eq!(probs, vec![0.1f32 as f64, 0.75, 0.5]);
    }

    #[test]
    fn test_single_column_tensor() {
        let probs = probs_from_tensor(&[2, 1], &[0.2, 0.8], 2).unwrap();
        assert_eq!(probs, vec![0.2f32 as f64, 0.8f32 as f64]);

        let probs = probs_from_tensor(&[2], &[0.3, 0.6], 2).unwrap();
        assert_eq!(probs, vec![0.3f32 as f64, 0.6f32 as f64]);
    }

    #[test]
    fn test_class_map_probability() {
        assert_eq!(fraud_from_class_map(&[(0, 0.75), (1, 0.25)]), Some(0.25));
        assert_eq!(fraud_from_class_map(&[(0, 0.75)]), Some(0.25));
        assert_eq!(fraud_from_class_map(&[(2, 0.5)]), None);
    }

    #[test]
    fn test_tensor_row_mismatch() {
        let err = probs_from_tensor(&[2, 2], &[0.5, 0.5, 0.5, 0.5], 3).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Model);
        assert!(probs_from_tensor(&[3], &[0.5, 0.5], 3).is_err());
        assert!(probs_from_tensor(&[2, 0], &[], 2).is_err());
        assert!(probs_from_tensor(&[1, 2, 3], &[0.0; 6], 1).is_err());
    }
}
