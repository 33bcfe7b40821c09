//! Output artifact serialization

use crate::error::{PipelineError, Result};
use crate::feature_extractor::FeatureVector;
use crate::numeric::finite_or;
use crate::types::score::{Explanation, ScoreResult};
use crate::types::transaction::TransactionRecord;
use csv::{QuoteStyle, WriterBuilder};

/// Columns appended to the input header, in output order
pub const DERIVED_COLUMNS: [&str; 19] = [
    "hour",
    "weekday",
    "month",
    "merchant_freq",
    "mcc_freq",
    "merchant_avg",
    "amount_dev",
    "z_amount_merchant",
    "days_since_merchant",
    "is_online",
    "merchant_novelty",
    "hour_dev",
    "fraud_confidence",
    "is_fraud",
    "anomaly_score",
    "anomaly_flag",
    "review_priority",
    "reasoning",
    "anomaly_reasoning",
];

/// A fully scored and explained record, ready to be written
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: TransactionRecord,
    pub features: FeatureVector,
    pub score: ScoreResult,
    pub explanation: Explanation,
}

/// Serialize rows as CSV in the order given.
///
/// Input columns are kept verbatim except ones whose name collides with a
/// derived column; those are replaced by the derived value.
pub fn write_csv(headers: &[String], rows: &[ScoredRecord]) -> Result<Vec<u8>> {
    let kept: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !DERIVED_COLUMNS.contains(&h.as_str()))
        .map(|(i, _)| i)
        .collect();

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .from_writer(Vec::new());

    let header_row: Vec<&str> = kept
        .iter()
        .map(|&i| headers[i].as_str())
        .chain(DERIVED_COLUMNS.iter().copied())
        .collect();
    writer.write_record(&header_row)?;

    for row in rows {
        let mut cells: Vec<String> = kept
            .iter()
            .map(|&i| row.record.raw.get(i).cloned().unwrap_or_default())
            .collect();
        cells.extend(derived_cells(row));
        writer.write_record(&cells)?;
    }

    writer
        .into_inner()
        .map_err(|e| PipelineError::Serialization(format!("failed to flush output: {}", e)))
}

fn derived_cells(row: &ScoredRecord) -> Vec<String> {
    let f = &row.features;
    let s = &row.score;
    vec![
        f.hour.to_string(),
        f.weekday.to_string(),
        f.month.to_string(),
        f.merchant_freq.to_string(),
        f.mcc_freq.to_string(),
        float(f.merchant_avg),
        float(f.amount_dev),
        float(f.z_amount_merchant),
        f.days_since_merchant.to_string(),
        flag(f.is_online),
        float(f.merchant_novelty),
        float(f.hour_dev),
        float(s.fraud_probability),
        flag(s.is_fraud),
        float(s.anomaly_score),
        flag(s.anomaly_flag),
        float(s.review_priority),
        row.explanation.reasoning.clone(),
        row.explanation.anomaly_reasoning.clone(),
    ]
}

fn float(value: f64) -> String {
    finite_or(value, 0.0).to_string()
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}
