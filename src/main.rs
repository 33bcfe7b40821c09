//! Transaction Risk Scoring Pipeline - Main Entry Point
//!
//! Consumes scoring requests from NATS, scores the referenced batch against the
//! frozen model and publishes the outcome. Requests are processed in parallel,
//! bounded by the configured worker count.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use txn_risk_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::{decode_request, RequestConsumer},
    metrics::{MetricsReporter, PipelineMetrics},
    models::ModelLoader,
    pipeline::ScoringPipeline,
    producer::OutcomeProducer,
    storage::{ArtifactStore, LocalArtifactStore},
    types::message::ScoringOutcome,
};

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("txn_risk_pipeline={}", logging.level).parse()?);

    match logging.format.as_str() {
        "json" => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        _ => tracing_subscriber::fmt().pretty().with_env_filter(filter).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Transaction Risk Scoring Pipeline");
    info!(
        fraud_threshold = config.scoring.fraud_threshold,
        anomaly_quantile = config.scoring.anomaly_quantile(),
        invalid_rows = ?config.validation.invalid_rows,
        anomaly_explainer = ?config.explanation.anomaly_strategy,
        "Configuration loaded"
    );

    // The frozen model is loaded exactly once; without it the service refuses to run
    let model = ModelLoader::with_threads(config.model.onnx_threads)
        .load(&config.model)
        .context("Frozen model unavailable")?;
    let pipeline = Arc::new(ScoringPipeline::new(model, &config));

    let store: Arc<dyn ArtifactStore> = Arc::new(
        LocalArtifactStore::open(&config.storage.root).context("Failed to open artifact store")?,
    );
    info!(root = %config.storage.root, "Artifact store ready");

    let metrics = Arc::new(PipelineMetrics::new());
    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = RequestConsumer::new(client.clone(), &config.nats.request_subject);
    let producer = Arc::new(OutcomeProducer::new(client.clone(), &config.nats.result_subject));

    let num_workers = config.pipeline.workers;
    info!(
        workers = num_workers,
        requests = %consumer.subject(),
        results = %producer.subject(),
        "Starting request loop"
    );

    // Semaphore to limit concurrent pipeline invocations
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let pipeline = pipeline.clone();
        let store = store.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let request = match decode_request(&message.payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed scoring request");
                    return;
                }
            };

            let start_time = Instant::now();
            let request_id = request.request_id.clone();
            let input = request.input_handle.clone();

            // Scoring is CPU-bound and synchronous
            let result = tokio::task::spawn_blocking(move || pipeline.run_from_store(store.as_ref(), &input)).await;

            let outcome = match result {
                Ok(Ok(output)) => {
                    metrics.record_batch(start_time.elapsed(), &output.summary);
                    info!(
                        request_id = %request_id,
                        output = %output.handle,
                        rows = output.summary.rows_scored,
                        fraud_flagged = output.summary.fraud_flagged,
                        anomaly_flagged = output.summary.anomaly_flagged,
                        processing_time_ms = start_time.elapsed().as_millis() as u64,
                        "Batch scored"
                    );
                    ScoringOutcome::completed(&request_id, &output)
                }
                Ok(Err(failure)) => {
                    metrics.record_failure(failure.error.kind(), start_time.elapsed());
                    warn!(
                        request_id = %request_id,
                        stage = %failure.stage,
                        kind = %failure.error.kind(),
                        error = %failure.error,
                        "Scoring request failed"
                    );
                    ScoringOutcome::failed(&request_id, &failure, start_time.elapsed().as_secs_f64() * 1000.0)
                }
                Err(e) => {
                    error!(request_id = %request_id, error = %e, "Scoring worker panicked");
                    return;
                }
            };

            if let Err(e) = producer.publish(&outcome).await {
                error!(request_id = %request_id, error = %e, "Failed to publish scoring outcome");
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                let stats = metrics.get_processing_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} rows/s", metrics.get_throughput()),
                    avg_batch_us = stats.mean_us,
                    "Processing milestone"
                );
            }

            // Release permit when done
            drop(permit);
        });
    }

    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}
