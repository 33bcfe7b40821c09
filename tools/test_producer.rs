//! Test Batch Producer
//!
//! Generates a synthetic transaction batch with injected outliers, stores it in
//! the local artifact store and publishes a scoring request to NATS.

use anyhow::Context;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use txn_risk_pipeline::storage::{ArtifactStore, LocalArtifactStore, INCOMING_PREFIX};
use txn_risk_pipeline::types::message::ScoringRequest;

const MERCHANTS: &[(&str, i64, f64)] = &[
    ("Fresh Market", 5411, 45.0),
    ("Corner Cafe", 5812, 9.0),
    ("Shell Station", 5541, 38.0),
    ("City Pharmacy", 5912, 22.0),
    ("Book Nook", 5942, 28.0),
    ("Urban Outfitters", 5651, 70.0),
];
const HOME_CITIES: &[&str] = &["Austin", "Round Rock"];

/// Synthetic batch generator for one account
struct BatchGenerator {
    rng: StdRng,
}

impl BatchGenerator {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// CSV with `rows` transactions spread over 30 days; about `outlier_rate` of them suspicious
    fn generate(&mut self, rows: usize, outlier_rate: f64) -> (String, usize) {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
        let mut out = String::from("timestamp,merchant,amount,mcc,city,country,channel\n");
        let mut outliers = 0;

        for _ in 0..rows {
            let offset = ChronoDuration::minutes(self.rng.gen_range(0..30 * 24 * 60));
            let (merchant, mcc, typical) = MERCHANTS[self.rng.gen_range(0..MERCHANTS.len())];

            let line = if self.rng.gen_bool(outlier_rate) {
                outliers += 1;
                // Large amount, unfamiliar place, online, small hours
                let ts = (start + offset).date_naive().and_hms_opt(self.rng.gen_range(0..5), 17, 0);
                let ts = ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()).unwrap_or_default();
                let amount = typical * self.rng.gen_range(40.0..120.0);
                let city = self.choice(&["Lagos", "Minsk", "Macau"]);
                let country = self.choice(&["NG", "BY", "MO"]);
                format!("{},{},{:.2},{},{},{},ONLINE\n", ts, merchant, amount, mcc, city, country)
            } else {
                let ts = start + offset;
                let channel = if self.rng.gen_bool(0.2) { "ONLINE" } else { "POS" };
                let amount = typical * self.rng.gen_range(0.6..1.4);
                let city = self.choice(HOME_CITIES);
                format!(
                    "{},{},{:.2},{},{},US,{}\n",
                    ts.format("%Y-%m-%d %H:%M:%S"),
                    merchant,
                    amount,
                    mcc,
                    city,
                    channel,
                )
            };
            out.push_str(&line);
        }
        (out, outliers)
    }

    fn choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Batch Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("scoring.requests");
    let rows: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(500);
    let outlier_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.02);
    let storage_root = args.get(5).map(|s| s.as_str()).unwrap_or("storage");
    let seed: u64 = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(7);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        rows = rows,
        outlier_rate = outlier_rate,
        storage_root = %storage_root,
        "Configuration loaded"
    );

    let (csv, outliers) = BatchGenerator::new(seed).generate(rows, outlier_rate.clamp(0.0, 1.0));

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            for line in csv.lines().take(6) {
                info!("{}", line);
            }
            info!(rows = rows, outliers = outliers, "Dry run complete");
            return Ok(());
        }
    };

    let store = LocalArtifactStore::open(storage_root).context("Failed to open artifact store")?;
    let handle = store.put(INCOMING_PREFIX, csv.as_bytes())?;
    let request = ScoringRequest::new(handle);

    let payload = serde_json::to_vec(&request)?;
    client.publish(subject.to_string(), payload.into()).await?;
    client.flush().await?;

    info!(
        request_id = %request.request_id,
        input = %request.input_handle,
        rows = rows,
        outliers = outliers,
        "Published scoring request"
    );

    Ok(())
}
