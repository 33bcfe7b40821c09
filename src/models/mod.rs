//! Scoring models: the frozen fraud classifier, the per-batch anomaly
//! detector and its surrogate, and review prioritization.

pub mod aggregator;
pub mod classifier;
pub mod fraud;
pub mod frozen;
pub mod inference;
pub mod isolation_forest;
pub mod loader;
pub mod surrogate;
pub mod transform;

pub use aggregator::{PriorityAggregator, Ranking};
pub use classifier::{Classifier, LogisticClassifier};
pub use fraud::{FraudClassifier, FraudScores};
pub use frozen::FrozenModel;
pub use inference::OnnxClassifier;
pub use isolation_forest::{AnomalyDetector, AnomalyScores, ForestParams};
pub use loader::ModelLoader;
pub use surrogate::SurrogateRegressor;
pub use transform::{FeatureTransform, RawFeatures, TransformedFeature};
