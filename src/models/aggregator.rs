//! Review priority: blends the per-batch anomaly score with the fraud
//! probability and orders rows for analyst review.

use crate::numeric::{finite_or, min_max_normalize};
use std::cmp::Ordering;

/// Combines anomaly and fraud scores into a single review priority.
#[derive(Debug, Clone)]
pub struct PriorityAggregator {
    anomaly_weight: f64,
    fraud_weight: f64,
    /// Added to the min-max range so constant anomaly scores normalize to 0
    epsilon: f64,
}

/// Per-row priorities plus the review order over row positions
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    /// Priority per input row, in input order
    pub priorities: Vec<f64>,
    /// Input row positions, highest priority first
    pub order: Vec<usize>,
}

impl PriorityAggregator {
    pub fn new(anomaly_weight: f64, fraud_weight: f64, epsilon: f64) -> Self {
        Self {
            anomaly_weight,
            fraud_weight,
            epsilon,
        }
    }

    pub fn weights(&self) -> (f64, f64) {
        (self.anomaly_weight, self.fraud_weight)
    }

    /// Priority per row: `w_a * minmax(anomaly) + w_f * probability`.
    pub fn priorities(&self, anomaly_scores: &[f64], probabilities: &[f64]) -> Vec<f64> {
        let normalized = min_max_normalize(anomaly_scores, self.epsilon);
        normalized
            .iter()
            .zip(probabilities)
            .map(|(&a, &p)| finite_or(self.anomaly_weight * a + self.fraud_weight * p, 0.0))
            .collect()
    }

    /// Compute priorities and a stable descending order.
    ///
    /// Rows with equal priority keep their relative input order.
    pub fn rank(&self, anomaly_scores: &[f64], probabilities: &[f64]) -> Ranking {
        let priorities = self.priorities(anomaly_scores, probabilities);
        let mut order: Vec<usize> = (0..priorities.len()).collect();
        order.sort_by(|&a, &b| descending(priorities[a], priorities[b]));
        Ranking { priorities, order }
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

impl Default for PriorityAggregator {
    fn default() -> Self {
        Self::new(0.7, 0.3, 1e-9)
    }
}
