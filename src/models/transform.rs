//! Frozen preprocessing: standard scaling for numeric columns and one-hot
//! encoding for categorical columns, fitted offline and loaded from JSON.

use crate::error::{PipelineError, Result};
use crate::numeric::finite_or;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Numeric input column with its training statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericColumn {
    pub name: String,
    pub mean: f64,
    pub scale: f64,
}

/// Categorical input column with its training vocabulary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalColumn {
    pub name: String,
    pub categories: Vec<String>,
}

/// One column of the transformed matrix and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedFeature {
    /// Internal identifier, e.g. `num__amount_dev` or `cat__city_Austin`
    pub name: String,
    /// Input column the value derives from
    pub source: String,
    /// Category value for one-hot indicators
    pub category: Option<String>,
}

impl TransformedFeature {
    pub fn is_indicator(&self) -> bool {
        self.category.is_some()
    }
}

/// Raw model inputs in the transform's column order
#[derive(Debug, Clone)]
pub struct RawFeatures {
    /// rows x numeric columns
    pub numeric: Array2<f64>,
    /// One vector per row, values in categorical column order
    pub categorical: Vec<Vec<String>>,
}

impl RawFeatures {
    pub fn rows(&self) -> usize {
        self.numeric.nrows()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTransform {
    pub numeric: Vec<NumericColumn>,
    pub categorical: Vec<CategoricalColumn>,
    #[serde(skip)]
    lookup: Vec<HashMap<String, usize>>,
}

impl FeatureTransform {
    pub fn new(numeric: Vec<NumericColumn>, categorical: Vec<CategoricalColumn>) -> Self {
        let mut transform = Self {
            numeric,
            categorical,
            lookup: Vec::new(),
        };
        transform.index_categories();
        transform
    }

    /// Parse a transform definition from JSON
    pub fn from_json(data: &str) -> Result<Self> {
        let parsed: FeatureTransform = serde_json::from_str(data)
            .map_err(|e| PipelineError::ModelUnavailable(format!("invalid transform definition: {}", e)))?;
        Ok(Self::new(parsed.numeric, parsed.categorical))
    }

    fn index_categories(&mut self) {
        let mut offset = self.numeric.len();
        self.lookup = self
            .categorical
            .iter()
            .map(|col| {
                let map: HashMap<String, usize> = col
                    .categories
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.clone(), offset + i))
                    .collect();
                offset += col.categories.len();
                map
            })
            .collect();
    }

    pub fn numeric_names(&self) -> impl Iterator<Item = &str> {
        self.numeric.iter().map(|c| c.name.as_str())
    }

    pub fn categorical_names(&self) -> impl Iterator<Item = &str> {
        self.categorical.iter().map(|c| c.name.as_str())
    }

    /// Input column names in training order (numeric first)
    pub fn input_columns(&self) -> Vec<&str> {
        self.numeric_names().chain(self.categorical_names()).collect()
    }

    /// Width of the transformed matrix
    pub fn output_width(&self) -> usize {
        self.numeric.len() + self.categorical.iter().map(|c| c.categories.len()).sum::<usize>()
    }

    /// Descriptions of every transformed column, in matrix order
    pub fn transformed_features(&self) -> Vec<TransformedFeature> {
        let mut out = Vec::with_capacity(self.output_width());
        for col in &self.numeric {
            out.push(TransformedFeature {
                name: format!("num__{}", col.name),
                source: col.name.clone(),
                category: None,
            });
        }
        for col in &self.categorical {
            for cat in &col.categories {
                out.push(TransformedFeature {
                    name: format!("cat__{}_{}", col.name, cat),
                    source: col.name.clone(),
                    category: Some(cat.clone()),
                });
            }
        }
        out
    }

    /// Apply scaling and one-hot encoding. Unknown categories encode as all zeros.
    pub fn transform(&self, raw: &RawFeatures) -> Result<Array2<f64>> {
        let rows = raw.rows();
        if raw.numeric.ncols() != self.numeric.len() {
            return Err(PipelineError::Schema(format!(
                "transform expects {} numeric inputs, got {}",
                self.numeric.len(),
                raw.numeric.ncols()
            )));
        }
        if raw.categorical.len() != rows
            || raw.categorical.iter().any(|r| r.len() != self.categorical.len())
        {
            return Err(PipelineError::Schema(format!(
                "transform expects {} categorical inputs per row",
                self.categorical.len()
            )));
        }

        let mut matrix = Array2::<f64>::zeros((rows, self.output_width()));
        for i in 0..rows {
            for (j, col) in self.numeric.iter().enumerate() {
                let scale = if col.scale == 0.0 || !col.scale.is_finite() {
                    1.0
                } else {
                    col.scale
                };
                matrix[[i, j]] = finite_or((raw.numeric[[i, j]] - col.mean) / scale, 0.0);
            }
            for (k, value) in raw.categorical[i].iter().enumerate() {
                if let Some(&j) = self.lookup[k].get(value) {
                    matrix[[i, j]] = 1.0;
                }
            }
        }
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn transform() -> FeatureTransform {
        FeatureTransform::new(
            vec![
                NumericColumn { name: "amount".into(), mean: 50.0, scale: 25.0 },
                NumericColumn { name: "hour".into(), mean: 12.0, scale: 0.0 },
            ],
            vec![CategoricalColumn {
                name: "city".into(),
                categories: vec!["Austin".into(), "Dallas".into()],
            }],
        )
    }

    #[test]
    fn test_transform_scaling_and_one_hot() {
        let t = transform();
        let raw = RawFeatures {
            numeric: array![[100.0, 14.0], [50.0, 12.0]],
            categorical: vec![vec!["Dallas".into()], vec!["Paris".into()]],
        };

        let m = t.transform(&raw).unwrap();
        assert_eq!(m.shape(), &[2, 4]);
        assert_eq!(m[[0, 0]], 2.0);
        // zero scale falls back to 1
        assert_eq!(m[[0, 1]], 2.0);
        assert_eq!(&m.row(0).to_vec()[2..], &[0.0, 1.0]);
        // unknown category
        assert_eq!(&m.row(1).to_vec()[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_transformed_feature_names() {
        let names: Vec<String> = transform().transformed_features().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["num__amount", "num__hour", "cat__city_Austin", "cat__city_Dallas"]);
        assert_eq!(transform().input_columns(), vec!["amount", "hour", "city"]);
    }

    #[test]
    fn test_from_json_and_shape_check() {
        let json = r#"{
            "numeric": [{"name": "amount", "mean": 0.0, "scale": 1.0}],
            "categorical": [{"name": "country", "categories": ["US"]}]
        }"#;
        let t = FeatureTransform::from_json(json).unwrap();
        assert_eq!(t.output_width(), 2);

        let bad = RawFeatures {
            numeric: array![[1.0, 2.0]],
            categorical: vec![vec!["US".into()]],
        };
        assert!(t.transform(&bad).is_err());

        assert!(FeatureTransform::from_json("{\"numeric\": 3}").is_err());
    }
}
