//! Per-batch anomaly detection with an isolation forest.
//!
//! The forest is fitted fresh on every batch and discarded afterwards; there is
//! no cross-batch baseline, so roughly `contamination` of every batch is
//! flagged, including batches with nothing unusual in them.

use crate::numeric::{checked_div, quantile};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use tracing::debug;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation forest hyperparameters
#[derive(Debug, Clone, Copy)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        value: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn fit(matrix: &Array2<f64>, mut rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(matrix, &mut rows, 0, height_limit, rng);
        tree
    }

    fn grow(
        &mut self,
        matrix: &Array2<f64>,
        rows: &mut [usize],
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });

        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        // Features that still vary among these rows
        let candidates: Vec<(usize, f64, f64)> = (0..matrix.ncols())
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = matrix[[r, f]];
                    (lo.min(v), hi.max(v))
                });
                (lo < hi).then_some((f, lo, hi))
            })
            .collect();

        if candidates.is_empty() {
            return id;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let value = rng.gen_range(lo..hi);

        // Partition in place: rows below the split value first
        let mut boundary = 0;
        for i in 0..rows.len() {
            if matrix[[rows[i], feature]] < value {
                rows.swap(i, boundary);
                boundary += 1;
            }
        }

        let (left_rows, right_rows) = rows.split_at_mut(boundary);
        let left = self.grow(matrix, left_rows, depth + 1, height_limit, rng);
        let right = self.grow(matrix, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            value,
            left,
            right,
        };
        id
    }

    fn path_length(&self, matrix: &Array2<f64>, row: usize) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    value,
                    left,
                    right,
                } => {
                    node = if matrix[[row, *feature]] < *value { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful search in a binary search tree of `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Anomaly scores and flags for one batch
#[derive(Debug, Clone)]
pub struct AnomalyScores {
    /// Higher = more anomalous, in (0, 1]
    pub scores: Vec<f64>,
    pub flags: Vec<bool>,
    /// Batch quantile the flags were cut at
    pub threshold: f64,
}

/// Fits an isolation forest on a batch and flags its upper tail
pub struct AnomalyDetector {
    params: ForestParams,
    contamination: f64,
}

impl AnomalyDetector {
    pub fn new(params: ForestParams, contamination: f64) -> Self {
        Self {
            params,
            contamination,
        }
    }

    pub fn quantile(&self) -> f64 {
        1.0 - self.contamination
    }

    /// Score every row of the transformed matrix against a forest fitted on the same rows
    pub fn detect(&self, matrix: &Array2<f64>) -> AnomalyScores {
        let n = matrix.nrows();
        if n == 0 {
            return AnomalyScores {
                scores: Vec::new(),
                flags: Vec::new(),
                threshold: 0.0,
            };
        }

        let psi = self.params.max_samples.clamp(1, n);
        let height_limit = (psi as f64).log2().ceil().max(0.0) as usize;
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        let trees: Vec<IsolationTree> = (0..self.params.n_trees.max(1))
            .map(|_| {
                let rows = sample(&mut rng, n, psi).into_vec();
                IsolationTree::fit(matrix, rows, height_limit, &mut rng)
            })
            .collect();

        let normalizer = average_path_length(psi);
        let scores: Vec<f64> = (0..n)
            .map(|row| {
                let mean_path =
                    trees.iter().map(|t| t.path_length(matrix, row)).sum::<f64>() / trees.len() as f64;
                2f64.powf(-checked_div(mean_path, normalizer, 0.0))
            })
            .collect();

        let threshold = quantile(&scores, self.quantile()).unwrap_or(f64::INFINITY);
        let flags: Vec<bool> = scores.iter().map(|&s| s >= threshold).collect();

        debug!(
            rows = n,
            trees = trees.len(),
            sample_size = psi,
            threshold = threshold,
            flagged = flags.iter().filter(|&&f| f).count(),
            "Anomaly detection complete"
        );

        AnomalyScores {
            scores,
            flags,
            threshold,
        }
    }
}
