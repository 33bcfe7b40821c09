//! Per-record verdicts produced by the scoring stages

use serde::{Deserialize, Serialize};

/// Scores for one record. `review_priority` only orders rows within its own batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Classifier fraud probability (0.0 - 1.0)
    pub fraud_probability: f64,

    /// `fraud_probability >= threshold`
    pub is_fraud: bool,

    /// Isolation score, higher = more anomalous
    pub anomaly_score: f64,

    /// Score at or above the batch's anomaly quantile
    pub anomaly_flag: bool,

    /// Weighted blend of normalized anomaly score and fraud probability
    pub review_priority: f64,
}

/// Reason strings for the two verdicts; empty when the verdict is negative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub reasoning: String,
    pub anomaly_reasoning: String,
}

/// Counts reported back to callers and metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub rows_in: usize,
    pub rows_scored: usize,
    pub rows_dropped: usize,
    pub fraud_flagged: usize,
    pub anomaly_flagged: usize,
}
