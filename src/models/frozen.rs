//! The frozen model: preprocessing transform plus classifier, loaded once and
//! shared read-only across invocations.

use crate::error::Result;
use crate::models::classifier::Classifier;
use crate::models::transform::{FeatureTransform, RawFeatures, TransformedFeature};
use ndarray::Array2;

pub struct FrozenModel {
    transform: FeatureTransform,
    classifier: Box<dyn Classifier>,
    features: Vec<TransformedFeature>,
}

impl FrozenModel {
    pub fn new(transform: FeatureTransform, classifier: Box<dyn Classifier>) -> Self {
        let features = transform.transformed_features();
        Self {
            transform,
            classifier,
            features,
        }
    }

    pub fn feature_transform(&self) -> &FeatureTransform {
        &self.transform
    }

    /// Columns of the transformed matrix
    pub fn transformed_features(&self) -> &[TransformedFeature] {
        &self.features
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    pub fn transform(&self, raw: &RawFeatures) -> Result<Array2<f64>> {
        self.transform.transform(raw)
    }

    /// Fraud probabilities for already-transformed rows
    pub fn predict_proba(&self, matrix: &Array2<f64>) -> Result<Vec<f64>> {
        self.classifier.predict_proba(matrix)
    }

    pub fn attribute(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        self.classifier.attribute(matrix)
    }
}

impl std::fmt::Debug for FrozenModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrozenModel")
            .field("classifier", &self.classifier.name())
            .field("inputs", &self.transform.input_columns())
            .field("width", &self.features.len())
            .finish()
    }
}
