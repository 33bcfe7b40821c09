//! Transaction Risk Scoring Pipeline Library
//!
//! Scores uploaded transaction batches: batch-relative feature engineering,
//! a frozen fraud classifier, a per-batch isolation forest, a review-priority
//! ranking and plain-language reasons for every flagged row.

pub mod config;
pub mod consumer;
pub mod error;
pub mod explain;
pub mod export;
pub mod feature_extractor;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod numeric;
pub mod pipeline;
pub mod producer;
pub mod storage;
pub mod types;

pub use config::AppConfig;
pub use consumer::RequestConsumer;
pub use error::{ErrorKind, PipelineError};
pub use feature_extractor::FeatureExtractor;
pub use models::{FrozenModel, ModelLoader};
pub use pipeline::{PipelineFailure, PipelineOutput, ScoringPipeline, Stage};
pub use producer::OutcomeProducer;
pub use storage::{ArtifactHandle, ArtifactStore, LocalArtifactStore, MemoryArtifactStore};
pub use types::{message::ScoringOutcome, message::ScoringRequest, transaction::TransactionRecord};
