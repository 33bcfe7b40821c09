//! Ridge-regression surrogate for the anomaly score.
//!
//! The isolation forest has no native per-feature attribution, so a linear
//! model is fitted on the same transformed matrix to approximate its scores.
//! Its contributions `coef_j * (x_ij - mean_j)` stand in for attributions.
//! The fit lives only as long as the batch it was trained on.

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, Axis};
use tracing::debug;

const PIVOT_EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct SurrogateRegressor {
    coefficients: Array1<f64>,
    intercept: f64,
    column_means: Array1<f64>,
}

impl SurrogateRegressor {
    /// Fit `target ~ matrix` with an L2 penalty of `ridge` on the coefficients.
    ///
    /// Fails with `DegenerateBatch` when the batch cannot support a regression:
    /// fewer than two rows, no columns, or a constant target.
    pub fn fit(matrix: &Array2<f64>, target: &[f64], ridge: f64) -> Result<Self> {
        let (n, d) = matrix.dim();
        if n < 2 {
            return Err(PipelineError::DegenerateBatch(format!(
                "surrogate needs at least 2 rows, got {}",
                n
            )));
        }
        if d == 0 {
            return Err(PipelineError::DegenerateBatch(
                "surrogate has no feature columns".to_string(),
            ));
        }
        if target.len() != n {
            return Err(PipelineError::Model(format!(
                "surrogate target has {} values for {} rows",
                target.len(),
                n
            )));
        }

        let y = Array1::from(target.to_vec());
        let y_mean = y.mean().unwrap_or(0.0);
        let yc = &y - y_mean;
        if yc.iter().all(|v| v.abs() < PIVOT_EPS) {
            return Err(PipelineError::DegenerateBatch(
                "anomaly scores are constant across the batch".to_string(),
            ));
        }

        let column_means = matrix
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::DegenerateBatch("empty matrix".to_string()))?;
        let xc = matrix - &column_means;

        let mut gram = xc.t().dot(&xc);
        for j in 0..d {
            gram[[j, j]] += ridge.max(PIVOT_EPS);
        }
        let rhs = xc.t().dot(&yc);
        let coefficients = solve(gram, rhs)?;

        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(PipelineError::DegenerateBatch(
                "surrogate coefficients are not finite".to_string(),
            ));
        }

        let intercept = y_mean - column_means.dot(&coefficients);
        debug!(rows = n, columns = d, ridge = ridge, "Surrogate regressor fitted");

        Ok(Self {
            coefficients,
            intercept,
            column_means,
        })
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    /// Batch column means the attributions are measured from
    pub fn column_means(&self) -> &Array1<f64> {
        &self.column_means
    }

    pub fn predict(&self, matrix: &Array2<f64>) -> Array1<f64> {
        matrix.dot(&self.coefficients) + self.intercept
    }

    /// Per-row, per-column contribution relative to the batch mean
    pub fn attribute(&self, matrix: &Array2<f64>) -> Array2<f64> {
        (matrix - &self.column_means) * &self.coefficients
    }
}

/// Solve `a x = b` by Gauss-Jordan elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < PIVOT_EPS {
            return Err(PipelineError::DegenerateBatch(
                "surrogate system is singular".to_string(),
            ));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }

        let diag = a[[col, col]];
        for k in 0..n {
            a[[col, k]] /= diag;
        }
        b[col] /= diag;

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use ndarray::array;

    #[test]
    fn test_recovers_linear_relationship() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0], [5.0, 0.0]];
        let y: Vec<f64> = x.rows().into_iter().map(|r| 0.1 + 0.5 * r[0] - 0.2 * r[1]).collect();

        let model = SurrogateRegressor::fit(&x, &y, 1e-6).unwrap();
        assert!((model.coefficients()[0] - 0.5).abs() < 1e-3);
        assert!((model.coefficients()[1] + 0.2).abs() < 1e-3);

        let predicted = model.predict(&x);
        for (p, t) in predicted.iter().zip(&y) {
            assert!((p - t).abs() < 1e-3);
        }
    }

    #[test]
    fn test_attribution_sums_to_centered_prediction() {
        let x = array![[1.0, 2.0], [2.0, 0.5], [3.0, 1.5], [8.0, 0.0]];
        let y = vec![0.40, 0.42, 0.45, 0.80];
        let model = SurrogateRegressor::fit(&x, &y, 1.0).unwrap();

        let attributions = model.attribute(&x);
        let predicted = model.predict(&x);
        let mean_pred = predicted.mean().unwrap();
        for i in 0..4 {
            let total: f64 = attributions.row(i).sum();
            assert!((total - (predicted[i] - mean_pred)).abs() < 1e-9);
        }
        // The outlying row is driven by the first column
        assert!(attributions[[3, 0]] > 0.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        let one_row = array![[1.0, 2.0]];
        let err = SurrogateRegressor::fit(&one_row, &[0.5], 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateBatch);

        let no_cols = Array2::<f64>::zeros((3, 0));
        let err = SurrogateRegressor::fit(&no_cols, &[0.1, 0.2, 0.3], 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateBatch);

        let x = array![[1.0], [2.0], [3.0]];
        let err = SurrogateRegressor::fit(&x, &[0.5, 0.5, 0.5], 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateBatch);
    }

    #[test]
    fn test_constant_columns_get_zero_weight() {
        let x = array![[1.0, 7.0], [2.0, 7.0], [3.0, 7.0]];
        let model = SurrogateRegressor::fit(&x, &[0.1, 0.2, 0.3], 0.5).unwrap();
        assert!(model.coefficients()[1].abs() < 1e-12);
    }
}
