//! End-to-end scoring scenarios against an in-process frozen model

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use txn_risk_pipeline::config::{AppConfig, InvalidRowPolicy};
use txn_risk_pipeline::export::DERIVED_COLUMNS;
use txn_risk_pipeline::feature_extractor::NUMERIC_FEATURES;
use txn_risk_pipeline::models::transform::{CategoricalColumn, NumericColumn};
use txn_risk_pipeline::models::{FeatureTransform, FrozenModel, LogisticClassifier, ModelLoader};
use txn_risk_pipeline::storage::{ArtifactStore, LocalArtifactStore, INCOMING_PREFIX};
use txn_risk_pipeline::{ErrorKind, PipelineOutput, ScoringPipeline, Stage};

const HEADER: &str = "timestamp,merchant,amount,mcc,city,country,channel\n";

/// Unit-scaled transform over every numeric feature plus channel indicators
fn frozen_model() -> Arc<FrozenModel> {
    let numeric = NUMERIC_FEATURES
        .iter()
        .map(|name| NumericColumn {
            name: name.to_string(),
            mean: 0.0,
            scale: 1.0,
        })
        .collect::<Vec<_>>();
    let categorical = vec![CategoricalColumn {
        name: "channel".to_string(),
        categories: vec!["POS".to_string(), "ONLINE".to_string()],
    }];
    let transform = FeatureTransform::new(numeric, categorical);

    // Weight the z-score heavily so a large deviation is confidently fraud
    let mut coefficients = vec![0.0; transform.output_width()];
    let z = NUMERIC_FEATURES
        .iter()
        .position(|&n| n == "z_amount_merchant")
        .unwrap();
    coefficients[z] = 2.5;
    coefficients[NUMERIC_FEATURES.len() + 1] = 0.5;

    Arc::new(FrozenModel::new(
        transform,
        Box::new(LogisticClassifier::new(-4.0, coefficients)),
    ))
}

fn pipeline_with(config: &AppConfig) -> ScoringPipeline {
    ScoringPipeline::new(frozen_model(), config)
}

fn pipeline() -> ScoringPipeline {
    pipeline_with(&AppConfig::default())
}

/// `count` grocery purchases of `amount` on one afternoon, one minute apart
fn steady_batch(count: usize, amount: f64) -> String {
    let mut csv = String::from(HEADER);
    for i in 0..count {
        csv.push_str(&format!(
            "2024-05-14 14:{:02}:00,Fresh Market,{:.2},5411,Austin,US,POS\n",
            i % 60,
            amount
        ));
    }
    csv
}

/// Varied account history across several merchants
fn varied_batch(rows: usize, seed: u64) -> String {
    let merchants = [
        ("Fresh Market", 5411, 45.0),
        ("Corner Cafe", 5812, 9.0),
        ("Shell Station", 5541, 38.0),
        ("Book Nook", 5942, 28.0),
    ];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut csv = String::from(HEADER);
    for _ in 0..rows {
        let (merchant, mcc, typical) = merchants[rng.gen_range(0..merchants.len())];
        let day = rng.gen_range(1..29);
        let hour = rng.gen_range(0..24);
        let minute = rng.gen_range(0..60);
        let amount = typical * rng.gen_range(0.3..3.0);
        let channel = if rng.gen_bool(0.3) { "ONLINE" } else { "POS" };
        csv.push_str(&format!(
            "2024-03-{:02} {:02}:{:02}:00,{},{:.2},{},Austin,US,{}\n",
            day, hour, minute, merchant, amount, mcc, channel
        ));
    }
    csv
}

fn find<'a>(output: &'a PipelineOutput, merchant: &str) -> Vec<&'a txn_risk_pipeline::export::ScoredRecord> {
    output
        .rows
        .iter()
        .filter(|r| r.record.merchant == merchant)
        .collect()
}

#[test]
fn test_single_visit_merchant() {
    let mut csv = steady_batch(10, 40.0);
    csv.push_str("2024-05-15 09:30:00,Harbor Books,18.50,5942,Austin,US,POS\n");

    let output = pipeline().run(csv.as_bytes()).unwrap();
    let rows = find(&output, "Harbor Books");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].features.days_since_merchant, -1);
    assert_eq!(rows[0].features.merchant_freq, 1);
    assert_eq!(rows[0].features.z_amount_merchant, 0.0);
}

#[test]
fn test_hundredfold_amount_is_flagged() {
    let mut csv = steady_batch(30, 10.0);
    csv.push_str("2024-05-14 14:45:30,Fresh Market,1000.00,5411,Austin,US,POS\n");

    let output = pipeline().run(csv.as_bytes()).unwrap();
    let outlier = output
        .rows
        .iter()
        .find(|r| r.record.amount == 1000.0)
        .unwrap();

    assert!(outlier.features.z_amount_merchant > 3.0);
    assert!(outlier.score.anomaly_flag);
    assert!(!outlier.explanation.anomaly_reasoning.is_empty());
    assert!(outlier.explanation.anomaly_reasoning.contains("anomaly score:"));

    let max = output
        .rows
        .iter()
        .map(|r| r.score.anomaly_score)
        .fold(f64::MIN, f64::max);
    assert_eq!(outlier.score.anomaly_score, max);

    // Highest priority goes to the outlier
    assert_eq!(output.rows[0].record.amount, 1000.0);
}

#[test]
fn test_constant_amounts_have_zero_z() {
    let output = pipeline().run(steady_batch(25, 42.0).as_bytes()).unwrap();
    for row in &output.rows {
        assert_eq!(row.features.z_amount_merchant, 0.0);
        assert_eq!(row.features.amount_dev, 0.0);
        assert!(row.score.anomaly_score.is_finite());
        assert!(row.score.review_priority.is_finite());
    }
}

#[test]
fn test_row_count_preserved() {
    let csv = varied_batch(120, 3);
    let output = pipeline().run(csv.as_bytes()).unwrap();
    assert_eq!(output.rows.len(), 120);
    assert_eq!(output.summary.rows_in, 120);
    assert_eq!(output.summary.rows_scored, 120);
    assert_eq!(output.summary.rows_dropped, 0);

    let mut indices: Vec<usize> = output.rows.iter().map(|r| r.record.row_index).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..120).collect::<Vec<_>>());
}

#[test]
fn test_probabilities_and_threshold() {
    let config = AppConfig::default();
    let output = pipeline_with(&config).run(varied_batch(150, 11).as_bytes()).unwrap();
    for row in &output.rows {
        let p = row.score.fraud_probability;
        assert!((0.0..=1.0).contains(&p));
        assert_eq!(row.score.is_fraud, p >= config.scoring.fraud_threshold);
    }
}

#[test]
fn test_flagged_rows_are_explained() {
    let output = pipeline().run(varied_batch(200, 5).as_bytes()).unwrap();
    assert!(output.summary.anomaly_flagged > 0);

    for row in &output.rows {
        if row.score.is_fraud {
            assert!(!row.explanation.reasoning.is_empty());
            assert!(row.explanation.reasoning.contains("confidence:"));
        } else {
            assert!(row.explanation.reasoning.is_empty());
        }
        if row.score.anomaly_flag {
            assert!(!row.explanation.anomaly_reasoning.is_empty());
        } else {
            assert!(row.explanation.anomaly_reasoning.is_empty());
        }
    }
}

#[test]
fn test_anomaly_flag_count_bound() {
    let config = AppConfig::default();
    let n = 200;
    let output = pipeline_with(&config).run(varied_batch(n, 21).as_bytes()).unwrap();

    let bound = ((1.0 - config.scoring.anomaly_quantile()) * n as f64).ceil() as usize;
    assert!(output.summary.anomaly_flagged <= bound);
    assert!(output.summary.anomaly_flagged >= 1);
}

#[test]
fn test_deterministic_output() {
    let csv = varied_batch(80, 9);
    let first = pipeline().run(csv.as_bytes()).unwrap();
    let second = pipeline().run(csv.as_bytes()).unwrap();
    assert_eq!(first.csv, second.csv);
}

#[test]
fn test_output_artifact_layout() {
    let output = pipeline().run(varied_batch(60, 2).as_bytes()).unwrap();

    let mut reader = csv::Reader::from_reader(output.csv.as_slice());
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(&headers[..7], ["timestamp", "merchant", "amount", "mcc", "city", "country", "channel"]);
    assert_eq!(&headers[7..], DERIVED_COLUMNS);

    let priority = headers.iter().position(|h| h == "review_priority").unwrap();
    let score_columns: Vec<usize> = ["fraud_confidence", "anomaly_score", "review_priority", "z_amount_merchant"]
        .iter()
        .map(|c| headers.iter().position(|h| h == c).unwrap())
        .collect();

    let mut last = f64::INFINITY;
    let mut count = 0;
    for record in reader.records() {
        let record = record.unwrap();
        for &col in &score_columns {
            let value: f64 = record[col].parse().unwrap();
            assert!(value.is_finite());
        }
        let p: f64 = record[priority].parse().unwrap();
        assert!(p <= last);
        last = p;
        count += 1;
    }
    assert_eq!(count, 60);
}

#[test]
fn test_invalid_rows_policy() {
    let mut csv = steady_batch(5, 20.0);
    csv.push_str("not a time,Fresh Market,20.00,5411,Austin,US,POS\n");

    let failure = pipeline().run(csv.as_bytes()).unwrap_err();
    assert_eq!(failure.stage, Stage::Parsed);
    assert_eq!(failure.error.kind(), ErrorKind::Validation);

    let mut config = AppConfig::default();
    config.validation.invalid_rows = InvalidRowPolicy::Drop;
    let output = pipeline_with(&config).run(csv.as_bytes()).unwrap();
    assert_eq!(output.summary.rows_scored, 5);
    assert_eq!(output.summary.rows_dropped, 1);
    assert_eq!(output.summary.rows_in, 6);
}

#[test]
fn test_local_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalArtifactStore::open(dir.path()).unwrap();
    let input = store.put(INCOMING_PREFIX, varied_batch(40, 4).as_bytes()).unwrap();

    let stored = pipeline().run_from_store(&store, &input).unwrap();
    assert!(store.get(&input).is_err());

    let bytes = store.get(&stored.handle).unwrap();
    let rows = csv::Reader::from_reader(bytes.as_slice()).records().count();
    assert_eq!(rows, 40);
    assert_eq!(stored.summary.rows_scored, 40);
}

#[test]
fn test_bundled_model_scores_batch() {
    let config = AppConfig::load_from_path("config/config.toml").unwrap();
    let model = ModelLoader::with_threads(config.model.onnx_threads)
        .load(&config.model)
        .unwrap();
    let pipeline = ScoringPipeline::new(model, &config);

    let mut csv = varied_batch(100, 17);
    csv.push_str("2024-03-29 03:12:00,Fresh Market,4800.00,5411,Lagos,NG,ONLINE\n");

    let output = pipeline.run(csv.as_bytes()).unwrap();
    assert_eq!(output.rows.len(), 101);
    assert_eq!(output.rows[0].record.city, "Lagos");
    assert!(output.rows[0].score.anomaly_flag);
}
