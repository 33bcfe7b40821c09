//! Pipeline orchestrator.
//!
//! One invocation runs synchronously from raw batch bytes to the serialized
//! output artifact:
//!
//! `Received -> Parsed -> FeatureEngineered -> Scored -> Ranked -> Explained -> Serialized -> Done`
//!
//! Any error ends the run in a single [`PipelineFailure`] carrying the stage
//! that could not be completed. Nothing is persisted on failure, and there
//! are no retries here; retry policy belongs to the caller.

use crate::config::{AnomalyExplainStrategy, AppConfig, InvalidRowPolicy};
use crate::error::PipelineError;
use crate::explain::{ExplainInput, ExplanationGenerator};
use crate::export::{write_csv, ScoredRecord};
use crate::feature_extractor::{EngineeredRecord, FeatureExtractor};
use crate::ingest::parse_batch;
use crate::models::aggregator::PriorityAggregator;
use crate::models::fraud::FraudClassifier;
use crate::models::frozen::FrozenModel;
use crate::models::isolation_forest::{AnomalyDetector, ForestParams};
use crate::storage::{ArtifactHandle, ArtifactStore, OUTPUT_PREFIX};
use crate::types::score::{BatchSummary, Explanation, ScoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pipeline states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Parsed,
    FeatureEngineered,
    Scored,
    Ranked,
    Explained,
    Serialized,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Parsed => "parsed",
            Stage::FeatureEngineered => "feature_engineered",
            Stage::Scored => "scored",
            Stage::Ranked => "ranked",
            Stage::Explained => "explained",
            Stage::Serialized => "serialized",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one invocation
#[derive(Debug, Error)]
#[error("pipeline failed before reaching {stage}: {error}")]
pub struct PipelineFailure {
    /// Stage that could not be completed
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
}

/// Result of a successful in-memory run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Serialized output artifact
    pub csv: Vec<u8>,
    /// Output rows in review-priority order
    pub rows: Vec<ScoredRecord>,
    pub summary: BatchSummary,
    /// Anomaly explanation strategy the batch ended up using
    pub anomaly_strategy: AnomalyExplainStrategy,
    pub elapsed: Duration,
}

/// Result of a run against the artifact store
#[derive(Debug, Clone)]
pub struct StoredOutput {
    pub handle: ArtifactHandle,
    pub summary: BatchSummary,
    pub elapsed: Duration,
}

/// Tracks the current state and logs each transition
struct Progress {
    stage: Stage,
    started: Instant,
}

impl Progress {
    fn start() -> Self {
        debug!(stage = %Stage::Received, "Batch received");
        Self {
            stage: Stage::Received,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: Stage, rows: usize) {
        debug!(
            from = %self.stage,
            stage = %next,
            rows = rows,
            elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0,
            "Stage complete"
        );
        self.stage = next;
    }
}

/// Attach the stage being attempted to an error
fn failed_at(stage: Stage) -> impl FnOnce(PipelineError) -> PipelineFailure {
    move |error| {
        warn!(stage = %stage, kind = %error.kind(), error = %error, "Pipeline failed");
        PipelineFailure { stage, error }
    }
}

/// Scores batches against a shared frozen model.
///
/// Holds no per-batch state; one instance can serve many concurrent calls.
pub struct ScoringPipeline {
    model: Arc<FrozenModel>,
    invalid_rows: InvalidRowPolicy,
    delete_input_after_read: bool,
    extractor: FeatureExtractor,
    classifier: FraudClassifier,
    detector: AnomalyDetector,
    aggregator: PriorityAggregator,
    explainer: ExplanationGenerator,
}

impl ScoringPipeline {
    pub fn new(model: Arc<FrozenModel>, config: &AppConfig) -> Self {
        let scoring = &config.scoring;
        let params = ForestParams {
            n_trees: scoring.n_trees,
            max_samples: scoring.max_samples,
            seed: scoring.seed,
        };

        Self {
            classifier: FraudClassifier::new(Arc::clone(&model), scoring.fraud_threshold),
            model,
            invalid_rows: config.validation.invalid_rows,
            delete_input_after_read: config.storage.delete_input_after_read,
            extractor: FeatureExtractor::new(config.features.clone()),
            detector: AnomalyDetector::new(params, scoring.contamination),
            aggregator: PriorityAggregator::new(scoring.anomaly_weight, scoring.fraud_weight, scoring.epsilon),
            explainer: ExplanationGenerator::new(config.explanation.clone()),
        }
    }

    pub fn model(&self) -> &FrozenModel {
        &self.model
    }

    /// Run the full pipeline over raw batch bytes
    pub fn run(&self, data: &[u8]) -> Result<PipelineOutput, PipelineFailure> {
        let mut progress = Progress::start();

        let batch = parse_batch(data, self.invalid_rows).map_err(failed_at(Stage::Parsed))?;
        let rows_dropped = batch.dropped_rows;
        progress.advance(Stage::Parsed, batch.len());

        let engineered = self.extractor.extract(batch);
        progress.advance(Stage::FeatureEngineered, engineered.len());

        let fraud = self
            .classifier
            .score(&engineered)
            .map_err(failed_at(Stage::Scored))?;
        let anomaly = self.detector.detect(&fraud.matrix);
        progress.advance(Stage::Scored, engineered.len());

        let ranking = self.aggregator.rank(&anomaly.scores, &fraud.probabilities);
        progress.advance(Stage::Ranked, ranking.order.len());

        let explained = self
            .explainer
            .explain(
                &self.model,
                &ExplainInput {
                    batch: &engineered,
                    matrix: &fraud.matrix,
                    probabilities: &fraud.probabilities,
                    is_fraud: &fraud.is_fraud,
                    anomaly_scores: &anomaly.scores,
                    anomaly_flags: &anomaly.flags,
                },
            )
            .map_err(failed_at(Stage::Explained))?;
        progress.advance(Stage::Explained, explained.explanations.len());

        let headers = engineered.headers;
        let mut slots: Vec<Option<(EngineeredRecord, Explanation)>> = engineered
            .rows
            .into_iter()
            .zip(explained.explanations)
            .map(Some)
            .collect();

        let mut rows = Vec::with_capacity(slots.len());
        for &i in &ranking.order {
            if let Some((engineered, explanation)) = slots[i].take() {
                rows.push(ScoredRecord {
                    record: engineered.record,
                    features: engineered.features,
                    score: ScoreResult {
                        fraud_probability: fraud.probabilities[i],
                        is_fraud: fraud.is_fraud[i],
                        anomaly_score: anomaly.scores[i],
                        anomaly_flag: anomaly.flags[i],
                        review_priority: ranking.priorities[i],
                    },
                    explanation,
                });
            }
        }

        let csv = write_csv(&headers, &rows).map_err(failed_at(Stage::Serialized))?;
        progress.advance(Stage::Serialized, rows.len());

        let summary = BatchSummary {
            rows_in: rows.len() + rows_dropped,
            rows_scored: rows.len(),
            rows_dropped,
            fraud_flagged: rows.iter().filter(|r| r.score.is_fraud).count(),
            anomaly_flagged: rows.iter().filter(|r| r.score.anomaly_flag).count(),
        };
        progress.advance(Stage::Done, rows.len());

        let elapsed = progress.started.elapsed();
        info!(
            rows = summary.rows_scored,
            dropped = summary.rows_dropped,
            fraud_flagged = summary.fraud_flagged,
            anomaly_flagged = summary.anomaly_flagged,
            anomaly_threshold = anomaly.threshold,
            explainer = ?explained.anomaly_strategy,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Batch scored"
        );

        Ok(PipelineOutput {
            csv,
            rows,
            summary,
            anomaly_strategy: explained.anomaly_strategy,
            elapsed,
        })
    }

    /// Fetch the input from the store, score it and persist the output artifact.
    ///
    /// The input is read once and, when configured, deleted straight after
    /// the read. Output is only written after serialization succeeded.
    pub fn run_from_store(
        &self,
        store: &dyn ArtifactStore,
        input: &ArtifactHandle,
    ) -> Result<StoredOutput, PipelineFailure> {
        let data = store.get(input).map_err(|error| {
            warn!(handle = %input, error = %error, "Failed to read input artifact");
            PipelineFailure {
                stage: Stage::Received,
                error,
            }
        })?;

        if self.delete_input_after_read {
            if let Err(e) = store.delete(input) {
                warn!(handle = %input, error = %e, "Failed to delete input artifact after read");
            }
        }

        let output = self.run(&data)?;
        let handle = store.put(OUTPUT_PREFIX, &output.csv).map_err(|error| {
            warn!(error = %error, "Failed to persist output artifact");
            PipelineFailure {
                stage: Stage::Done,
                error,
            }
        })?;

        info!(input = %input, output = %handle, rows = output.summary.rows_scored, "Output artifact stored");
        Ok(StoredOutput {
            handle,
            summary: output.summary,
            elapsed: output.elapsed,
        })
    }
}
