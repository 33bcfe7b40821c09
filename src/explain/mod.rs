//! Reason strings for fraud verdicts and anomaly flags.
//!
//! Fraud reasons come from the classifier's own attributions. Anomaly reasons
//! come from one strategy per batch: attributions of a surrogate fitted to the
//! anomaly scores, or quantile rule checks. A flagged row always gets a
//! non-empty reason string.

pub mod phrases;
pub mod rules;

use crate::config::{AnomalyExplainStrategy, ExplanationConfig};
use crate::error::{PipelineError, Result};
use crate::feature_extractor::EngineeredBatch;
use crate::models::frozen::FrozenModel;
use crate::models::surrogate::SurrogateRegressor;
use crate::models::transform::TransformedFeature;
use crate::types::score::Explanation;
use ndarray::{Array2, Axis};
use phrases::{Direction, PhraseBook, GENERIC_ANOMALY_REASON, GENERIC_FRAUD_REASON};
use rules::RuleExplainer;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Inputs the explainer needs for one batch, all in the batch's row order
pub struct ExplainInput<'a> {
    pub batch: &'a EngineeredBatch,
    /// Transformed feature matrix
    pub matrix: &'a Array2<f64>,
    pub probabilities: &'a [f64],
    pub is_fraud: &'a [bool],
    pub anomaly_scores: &'a [f64],
    pub anomaly_flags: &'a [bool],
}

/// Explanations for a batch and the anomaly strategy actually used
#[derive(Debug, Clone)]
pub struct BatchExplanations {
    pub explanations: Vec<Explanation>,
    pub anomaly_strategy: AnomalyExplainStrategy,
}

pub struct ExplanationGenerator {
    config: ExplanationConfig,
    phrases: PhraseBook,
}

impl ExplanationGenerator {
    pub fn new(config: ExplanationConfig) -> Self {
        Self {
            config,
            phrases: PhraseBook::new(),
        }
    }

    pub fn explain(&self, model: &FrozenModel, input: &ExplainInput<'_>) -> Result<BatchExplanations> {
        let n = input.batch.len();
        if [
            input.matrix.nrows(),
            input.probabilities.len(),
            input.is_fraud.len(),
            input.anomaly_scores.len(),
            input.anomaly_flags.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return Err(PipelineError::Model(format!(
                "explanation inputs do not all have {} rows",
                n
            )));
        }

        let reasoning = self.fraud_reasons(model, input)?;
        let (anomaly_reasoning, anomaly_strategy) = self.anomaly_reasons(model, input)?;

        let explanations = reasoning
            .into_iter()
            .zip(anomaly_reasoning)
            .map(|(reasoning, anomaly_reasoning)| Explanation {
                reasoning,
                anomaly_reasoning,
            })
            .collect();

        Ok(BatchExplanations {
            explanations,
            anomaly_strategy,
        })
    }

    /// Reasons from classifier attributions, computed only for fraud-flagged rows
    pub fn fraud_reasons(&self, model: &FrozenModel, input: &ExplainInput<'_>) -> Result<Vec<String>> {
        let mut out = vec![String::new(); input.batch.len()];
        let flagged: Vec<usize> = flagged_rows(input.is_fraud);
        if flagged.is_empty() {
            return Ok(out);
        }

        let subset = input.matrix.select(Axis(0), &flagged);
        let attributions = model.attribute(&subset)?;
        let features = model.transformed_features();

        for (k, &row) in flagged.iter().enumerate() {
            let reasons = self.top_reasons(features, subset.row(k).to_vec(), attributions.row(k).to_vec(), None);
            let body = join_or(reasons, GENERIC_FRAUD_REASON);
            out[row] = format!("{} (confidence: {:.2})", body, input.probabilities[row]);
        }

        debug!(rows = flagged.len(), "Fraud reasons generated");
        Ok(out)
    }

    /// Reasons for anomaly-flagged rows with the configured strategy.
    ///
    /// A batch the surrogate cannot be fitted on falls back to the rules as a
    /// whole; the strategy is never mixed within one batch.
    pub fn anomaly_reasons(
        &self,
        model: &FrozenModel,
        input: &ExplainInput<'_>,
    ) -> Result<(Vec<String>, AnomalyExplainStrategy)> {
        let flagged = flagged_rows(input.anomaly_flags);
        let mut out = vec![String::new(); input.batch.len()];
        if flagged.is_empty() {
            return Ok((out, self.config.anomaly_strategy));
        }

        let per_row: Vec<Vec<String>> = match self.config.anomaly_strategy {
            AnomalyExplainStrategy::Surrogate => {
                match SurrogateRegressor::fit(input.matrix, input.anomaly_scores, self.config.surrogate_ridge) {
                    Ok(surrogate) => {
                        let attributions = surrogate.attribute(input.matrix);
                        let means = surrogate.column_means().to_vec();
                        let features = model.transformed_features();
                        let reasons = flagged
                            .iter()
                            .map(|&row| {
                                self.top_reasons(
                                    features,
                                    input.matrix.row(row).to_vec(),
                                    attributions.row(row).to_vec(),
                                    Some(means.as_slice()),
                                )
                            })
                            .collect();
                        self.finish_anomaly(&mut out, &flagged, reasons, input.anomaly_scores);
                        return Ok((out, AnomalyExplainStrategy::Surrogate));
                    }
                    Err(e @ PipelineError::DegenerateBatch(_)) => {
                        warn!(error = %e, "Surrogate unavailable for this batch; using rule explanations");
                        self.rule_reasons(input, &flagged)
                    }
                    Err(e) => return Err(e),
                }
            }
            AnomalyExplainStrategy::Rules => self.rule_reasons(input, &flagged),
        };

        self.finish_anomaly(&mut out, &flagged, per_row, input.anomaly_scores);
        Ok((out, AnomalyExplainStrategy::Rules))
    }

    fn rule_reasons(&self, input: &ExplainInput<'_>, flagged: &[usize]) -> Vec<Vec<String>> {
        let rules = RuleExplainer::fit(input.batch, self.config.rule_quantile);
        flagged
            .iter()
            .map(|&row| rules.reasons(input.batch, row, self.config.max_reasons))
            .collect()
    }

    fn finish_anomaly(&self, out: &mut [String], flagged: &[usize], reasons: Vec<Vec<String>>, scores: &[f64]) {
        for (&row, reasons) in flagged.iter().zip(reasons) {
            let body = join_or(reasons, GENERIC_ANOMALY_REASON);
            out[row] = format!("{} (anomaly score: {:.3})", body, scores[row]);
        }
    }

    /// Top positive contributions of one row, as phrases.
    ///
    /// `reference` is the per-column value the direction is measured from;
    /// `None` means the transform's zero baseline.
    fn top_reasons(
        &self,
        features: &[TransformedFeature],
        values: Vec<f64>,
        attributions: Vec<f64>,
        reference: Option<&[f64]>,
    ) -> Vec<String> {
        let mut candidates: Vec<(usize, f64)> = attributions
            .iter()
            .copied()
            .enumerate()
            .filter(|&(j, a)| a.is_finite() && a > 0.0 && j < features.len())
            // One-hot columns only count for the category the record actually has
            .filter(|&(j, _)| !features[j].is_indicator() || values[j] != 0.0)
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let mut reasons: Vec<String> = Vec::new();
        for (j, _) in candidates {
            let base = reference.and_then(|r| r.get(j).copied()).unwrap_or(0.0);
            let phrase = self.phrases.describe(&features[j], Direction::of(values[j], base));
            if !reasons.contains(&phrase) {
                reasons.push(phrase);
            }
            if reasons.len() >= self.config.max_reasons {
                break;
            }
        }
        reasons
    }
}

fn flagged_rows(flags: &[bool]) -> Vec<usize> {
    flags
        .iter()
        .enumerate()
        .filter_map(|(i, &f)| f.then_some(i))
        .collect()
}

fn join_or(reasons: Vec<String>, fallback: &str) -> String {
    if reasons.is_empty() {
        fallback.to_string()
    } else {
        reasons.join("; ")
    }
}
