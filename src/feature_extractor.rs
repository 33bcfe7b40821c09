//! Batch-relative feature engineering.
//!
//! Every aggregate here (frequencies, merchant means, recency) is scoped to the
//! batch being scored and recomputed on each run. Nothing is cached across
//! batches.

use crate::config::FeatureConfig;
use crate::numeric::{checked_div, divisor_std, finite_or, mean};
use crate::types::transaction::{TransactionBatch, TransactionRecord};
use chrono::{Datelike, Timelike};
use std::collections::HashMap;

const SECONDS_PER_DAY: i64 = 86_400;

/// Numeric columns the extractor can hand to a model, in output order
pub const NUMERIC_FEATURES: [&str; 14] = [
    "amount",
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
    "is_odd_hour",
];

/// Categorical columns the extractor can hand to a model
pub const CATEGORICAL_FEATURES: [&str; 5] = ["merchant", "mcc", "city", "country", "channel"];

/// Features derived for one record
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    /// Hour of day (0-23)
    pub hour: u32,
    /// Day of week, Monday = 0
    pub weekday: u32,
    /// Month (1-12)
    pub month: u32,
    /// Rows in the batch with the same merchant
    pub merchant_freq: usize,
    /// Rows in the batch with the same category code
    pub mcc_freq: usize,
    pub city_freq: usize,
    pub country_freq: usize,
    /// Mean amount of this merchant within the batch
    pub merchant_avg: f64,
    /// Amount minus merchant mean
    pub amount_dev: f64,
    /// Amount deviation in merchant standard deviations
    pub z_amount_merchant: f64,
    /// Whole days since the merchant previously appeared; -1 on first sight
    pub days_since_merchant: i64,
    pub is_online: bool,
    /// 1 / (merchant_freq + 1)
    pub merchant_novelty: f64,
    /// Distance in hours from the merchant's mean transaction hour
    pub hour_dev: f64,
    pub is_odd_hour: bool,
}

impl FeatureVector {
    /// Look up a numeric feature (or the raw amount) by column name
    pub fn numeric(&self, record: &TransactionRecord, name: &str) -> Option<f64> {
        let value = match name {
            "amount" => record.amount,
            "hour" => self.hour as f64,
            "weekday" => self.weekday as f64,
            "month" => self.month as f64,
            "merchant_freq" => self.merchant_freq as f64,
            "mcc_freq" => self.mcc_freq as f64,
            "merchant_avg" => self.merchant_avg,
            "amount_dev" => self.amount_dev,
            "z_amount_merchant" => self.z_amount_merchant,
            "days_since_merchant" => self.days_since_merchant as f64,
            "is_online" => bool_value(self.is_online),
            "merchant_novelty" => self.merchant_novelty,
            "hour_dev" => self.hour_dev,
            "is_odd_hour" => bool_value(self.is_odd_hour),
            _ => return None,
        };
        Some(value)
    }
}

/// Look up a categorical column of the record by name
pub fn categorical(record: &TransactionRecord, name: &str) -> Option<String> {
    match name {
        "merchant" => Some(record.merchant.clone()),
        "mcc" => Some(record.mcc.to_string()),
        "city" => Some(record.city.clone()),
        "country" => Some(record.country.clone()),
        "channel" => Some(record.channel.clone()),
        _ => None,
    }
}

fn bool_value(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// A record with its derived features
#[derive(Debug, Clone)]
pub struct EngineeredRecord {
    pub record: TransactionRecord,
    pub features: FeatureVector,
}

/// Batch after feature engineering, sorted ascending by timestamp
#[derive(Debug, Clone)]
pub struct EngineeredBatch {
    pub headers: Vec<String>,
    pub rows: Vec<EngineeredRecord>,
    pub dropped_rows: usize,
}

impl EngineeredBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Derives the per-record feature vector from a validated batch.
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// True when the extractor can supply the named model input column
    pub fn supports(name: &str) -> bool {
        NUMERIC_FEATURES.contains(&name) || CATEGORICAL_FEATURES.contains(&name)
    }

    pub fn feature_count(&self) -> usize {
        NUMERIC_FEATURES.len() + CATEGORICAL_FEATURES.len()
    }

    /// Derive features for the whole batch.
    ///
    /// Rows are returned sorted by timestamp (stable, so equal instants keep
    /// their upload order); row count and row identity are unchanged.
    pub fn extract(&self, batch: TransactionBatch) -> EngineeredBatch {
        let TransactionBatch {
            headers,
            mut records,
            dropped_rows,
        } = batch;

        records.sort_by_key(|r| r.timestamp);

        let merchant_freq = count_by(&records, |r| r.merchant.as_str());
        let city_freq = count_by(&records, |r| r.city.as_str());
        let country_freq = count_by(&records, |r| r.country.as_str());
        let mut mcc_freq: HashMap<i64, usize> = HashMap::new();
        for r in &records {
            *mcc_freq.entry(r.mcc).or_insert(0) += 1;
        }

        let mut merchant_amounts: HashMap<&str, Vec<f64>> = HashMap::new();
        let mut merchant_hours: HashMap<&str, Vec<f64>> = HashMap::new();
        for r in &records {
            merchant_amounts
                .entry(r.merchant.as_str())
                .or_default()
                .push(r.amount);
            merchant_hours
                .entry(r.merchant.as_str())
                .or_default()
                .push(r.timestamp.hour() as f64);
        }

        let amount_stats: HashMap<&str, (f64, f64)> = merchant_amounts
            .iter()
            .map(|(m, amounts)| (*m, (mean(amounts).unwrap_or(0.0), divisor_std(amounts))))
            .collect();
        let mean_hours: HashMap<&str, f64> = merchant_hours
            .iter()
            .map(|(m, hours)| (*m, mean(hours).unwrap_or(0.0)))
            .collect();

        let mut last_seen: HashMap<&str, chrono::DateTime<chrono::Utc>> = HashMap::new();
        let mut features = Vec::with_capacity(records.len());

        for r in &records {
            let merchant = r.merchant.as_str();
            let hour = r.timestamp.hour();
            let freq = merchant_freq.get(merchant).copied().unwrap_or(1);
            let (merchant_avg, merchant_std) = amount_stats
                .get(merchant)
                .copied()
                .unwrap_or((r.amount, 1.0));

            let amount_dev = finite_or(r.amount - merchant_avg, 0.0);
            let z_amount_merchant = checked_div(amount_dev, merchant_std, 0.0);

            let days_since_merchant = match last_seen.insert(merchant, r.timestamp) {
                Some(prev) => (r.timestamp - prev).num_seconds().div_euclid(SECONDS_PER_DAY),
                None => -1,
            };

            let mean_hour = mean_hours.get(merchant).copied().unwrap_or(hour as f64);

            features.push(FeatureVector {
                hour,
                weekday: r.timestamp.weekday().num_days_from_monday(),
                month: r.timestamp.month(),
                merchant_freq: freq,
                mcc_freq: mcc_freq.get(&r.mcc).copied().unwrap_or(1),
                city_freq: city_freq.get(r.city.as_str()).copied().unwrap_or(1),
                country_freq: country_freq.get(r.country.as_str()).copied().unwrap_or(1),
                merchant_avg,
                amount_dev,
                z_amount_merchant,
                days_since_merchant,
                is_online: self.is_online(&r.channel),
                merchant_novelty: checked_div(1.0, freq as f64 + 1.0, 0.0),
                hour_dev: finite_or((hour as f64 - mean_hour).abs(), 0.0),
                is_odd_hour: self.is_odd_hour(hour),
            });
        }

        let rows = records
            .into_iter()
            .zip(features)
            .map(|(record, features)| EngineeredRecord { record, features })
            .collect();

        EngineeredBatch {
            headers,
            rows,
            dropped_rows,
        }
    }

    fn is_online(&self, channel: &str) -> bool {
        if self.config.channel_case_sensitive {
            channel == self.config.online_channel
        } else {
            channel.eq_ignore_ascii_case(&self.config.online_channel)
        }
    }

    fn is_odd_hour(&self, hour: u32) -> bool {
        let (start, end) = (self.config.odd_hours_start, self.config.odd_hours_end);
        if start <= end {
            (start..=end).contains(&hour)
        } else {
            hour >= start || hour <= end
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

fn count_by<'a, F>(records: &'a [TransactionRecord], key: F) -> HashMap<&'a str, usize>
where
    F: Fn(&'a TransactionRecord) -> &'a str,
{
    let mut counts = HashMap::new();
    for r in records {
        *counts.entry(key(r)).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(i: usize, day: u32, hour: u32, merchant: &str, amount: f64, channel: &str) -> TransactionRecord {
        let ts = Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap();
        TransactionRecord::new(i, ts, merchant, amount, 5812, "Austin", "US", channel)
    }

    fn extract(records: Vec<TransactionRecord>) -> EngineeredBatch {
        FeatureExtractor::default().extract(TransactionBatch::from_records(records))
    }

    #[test]
    fn test_single_occurrence_merchant() {
        let batch = extract(vec![
            record(0, 1, 10, "Corner Cafe", 10.0, "POS"),
            record(1, 2, 11, "Book Nook", 25.0, "POS"),
            record(2, 3, 12, "Corner Cafe", 14.0, "POS"),
        ]);

        let nook = batch.rows.iter().find(|r| r.record.merchant == "Book Nook").unwrap();
        assert_eq!(nook.features.days_since_merchant, -1);
        assert_eq!(nook.features.merchant_freq, 1);
        assert_eq!(nook.features.z_amount_merchant, 0.0);
        assert_eq!(nook.features.merchant_novelty, 0.5);
    }

    #[test]
    fn test_sorted_by_timestamp_and_recency() {
        let batch = extract(vec![
            record(0, 9, 10, "Corner Cafe", 10.0, "POS"),
            record(1, 2, 11, "Corner Cafe", 12.0, "POS"),
            record(2, 5, 12, "Corner Cafe", 14.0, "POS"),
        ]);

        let order: Vec<usize> = batch.rows.iter().map(|r| r.record.row_index).collect();
        assert_eq!(order, vec![1, 2, 0]);

        let days: Vec<i64> = batch.rows.iter().map(|r| r.features.days_since_merchant).collect();
        // 2nd 11:00 -> 5th 12:00 is 3 days 1 hour; 5th 12:00 -> 9th 10:00 is 3 days 22 hours
        assert_eq!(days, vec![-1, 3, 3]);
    }

    #[test]
    fn test_constant_amounts_have_zero_z_score() {
        let batch = extract(vec![
            record(0, 1, 10, "Fuel Stop", 40.0, "POS"),
            record(1, 2, 10, "Fuel Stop", 40.0, "POS"),
            record(2, 3, 10, "Fuel Stop", 40.0, "POS"),
        ]);

        for row in &batch.rows {
            assert_eq!(row.features.z_amount_merchant, 0.0);
            assert_eq!(row.features.amount_dev, 0.0);
            assert_eq!(row.features.hour_dev, 0.0);
            assert!(row.features.z_amount_merchant.is_finite());
        }
    }

    #[test]
    fn test_amount_statistics() {
        let batch = extract(vec![
            record(0, 1, 10, "Fuel Stop", 10.0, "POS"),
            record(1, 2, 14, "Fuel Stop", 30.0, "POS"),
        ]);

        let first = &batch.rows[0].features;
        assert_eq!(first.merchant_avg, 20.0);
        assert_eq!(first.amount_dev, -10.0);
        // sample std of [10, 30] = 14.142...
        assert!((first.z_amount_merchant + 0.7071).abs() < 1e-3);
        assert_eq!(first.hour_dev, 2.0);
        assert_eq!(first.mcc_freq, 2);
    }

    #[test]
    fn test_online_channel_policy() {
        let records = vec![
            record(0, 1, 10, "Shop", 10.0, "ONLINE"),
            record(1, 2, 10, "Shop", 10.0, "online"),
        ];

        let strict = extract(records.clone());
        assert!(strict.rows[0].features.is_online);
        assert!(!strict.rows[1].features.is_online);

        let relaxed = FeatureExtractor::new(FeatureConfig {
            channel_case_sensitive: false,
            ..FeatureConfig::default()
        })
        .extract(TransactionBatch::from_records(records));
        assert!(relaxed.rows.iter().all(|r| r.features.is_online));
    }

    #[test]
    fn test_odd_hours_and_calendar() {
        let batch = extract(vec![
            record(0, 6, 3, "Shop", 10.0, "POS"),
            record(1, 6, 15, "Shop", 10.0, "POS"),
        ]);
        assert!(batch.rows[0].features.is_odd_hour);
        assert!(!batch.rows[1].features.is_odd_hour);
        // 2024-05-06 is a Monday
        assert_eq!(batch.rows[0].features.weekday, 0);
        assert_eq!(batch.rows[0].features.month, 5);

        let wrapping = FeatureExtractor::new(FeatureConfig {
            odd_hours_start: 22,
            odd_hours_end: 4,
            ..FeatureConfig::default()
        });
        assert!(wrapping.is_odd_hour(23));
        assert!(wrapping.is_odd_hour(2));
        assert!(!wrapping.is_odd_hour(12));
    }

    #[test]
    fn test_deterministic() {
        let records = vec![
            record(0, 1, 10, "A", 10.0, "POS"),
            record(1, 1, 10, "B", 99.0, "ONLINE"),
            record(2, 2, 23, "A", 12.5, "POS"),
        ];
        let a = extract(records.clone());
        let b = extract(records);
        let fa: Vec<FeatureVector> = a.rows.into_iter().map(|r| r.features).collect();
        let fb: Vec<FeatureVector> = b.rows.into_iter().map(|r| r.features).collect();
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_supported_columns() {
        assert!(FeatureExtractor::supports("amount_dev"));
        assert!(FeatureExtractor::supports("country"));
        assert!(!FeatureExtractor::supports("LIMIT_BAL"));
        assert_eq!(FeatureExtractor::default().feature_count(), 19);
    }
}
