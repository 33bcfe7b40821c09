//! Service metrics for the scoring pipeline.

use crate::error::ErrorKind;
use crate::types::score::BatchSummary;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const MAX_SAMPLES: usize = 10_000;

/// Metrics collector shared by all workers
pub struct PipelineMetrics {
    /// Batches that reached `Done`
    pub batches_completed: AtomicU64,
    /// Batches that ended in a failure
    pub batches_failed: AtomicU64,
    pub rows_scored: AtomicU64,
    pub rows_dropped: AtomicU64,
    pub fraud_flagged: AtomicU64,
    pub anomaly_flagged: AtomicU64,
    failures_by_kind: RwLock<HashMap<ErrorKind, u64>>,
    /// Batch processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            batches_completed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            rows_dropped: AtomicU64::new(0),
            fraud_flagged: AtomicU64::new(0),
            anomaly_flagged: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a successfully scored batch
    pub fn record_batch(&self, processing_time: Duration, summary: &BatchSummary) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.rows_scored
            .fetch_add(summary.rows_scored as u64, Ordering::Relaxed);
        self.rows_dropped
            .fetch_add(summary.rows_dropped as u64, Ordering::Relaxed);
        self.fraud_flagged
            .fetch_add(summary.fraud_flagged as u64, Ordering::Relaxed);
        self.anomaly_flagged
            .fetch_add(summary.anomaly_flagged as u64, Ordering::Relaxed);
        self.record_time(processing_time);
    }

    /// Record a failed batch
    pub fn record_failure(&self, kind: ErrorKind, processing_time: Duration) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_kind) = self.failures_by_kind.write() {
            *by_kind.entry(kind).or_insert(0) += 1;
        }
        self.record_time(processing_time);
    }

    fn record_time(&self, processing_time: Duration) {
        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only the most recent samples
            if times.len() > MAX_SAMPLES {
                times.drain(0..MAX_SAMPLES / 2);
            }
        }
    }

    /// Get batch processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted: Vec<u64> = match self.processing_times.read() {
            Ok(times) => times.clone(),
            Err(_) => return ProcessingStats::default(),
        };
        if sorted.is_empty() {
            return ProcessingStats::default();
        }
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.50),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Rows scored per second since start-up
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_failures_by_kind(&self) -> HashMap<ErrorKind, u64> {
        self.failures_by_kind
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let completed = self.batches_completed.load(Ordering::Relaxed);
        let failed = self.batches_failed.load(Ordering::Relaxed);
        let rows = self.rows_scored.load(Ordering::Relaxed);
        let dropped = self.rows_dropped.load(Ordering::Relaxed);
        let fraud = self.fraud_flagged.load(Ordering::Relaxed);
        let anomalies = self.anomaly_flagged.load(Ordering::Relaxed);
        let rate = |n: u64| if rows > 0 { n as f64 / rows as f64 * 100.0 } else { 0.0 };

        let processing = self.get_processing_stats();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            RISK SCORING PIPELINE - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Batches: {:>6} done  {:>6} failed  │  Rows/s: {:>8.1}     ║",
            completed,
            failed,
            self.get_throughput()
        );
        info!(
            "║ Rows scored: {:>9}  │  Rows dropped: {:>9}           ║",
            rows, dropped
        );
        info!(
            "║ Fraud flagged: {:>7} ({:>5.1}%)  Anomalies: {:>7} ({:>5.1}%) ║",
            fraud,
            rate(fraud),
            anomalies,
            rate(anomalies)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Batch time (μs): mean={:>7} p50={:>7} p95={:>7} p99={:>7} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );

        let failures = self.get_failures_by_kind();
        if !failures.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Failures by kind:                                            ║");
            for (kind, count) in &failures {
                info!("║   {:24}: {:>6}                            ║", kind.as_str(), count);
            }
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints a metrics summary on a fixed interval
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
