//! Transaction record data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Columns every input batch must carry
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "timestamp",
    "merchant",
    "amount",
    "mcc",
    "city",
    "country",
    "channel",
];

/// One validated row of raw input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Position of the row in the uploaded file (0-based, data rows only)
    pub row_index: usize,

    /// Parsed transaction instant
    pub timestamp: DateTime<Utc>,

    /// Merchant name
    pub merchant: String,

    /// Non-negative transaction amount
    pub amount: f64,

    /// Merchant category code
    pub mcc: i64,

    pub city: String,

    pub country: String,

    /// Channel label (ONLINE, POS, ...)
    pub channel: String,

    /// Every input cell exactly as uploaded, in header order
    pub raw: Vec<String>,
}

/// A validated batch together with the header it was read with
#[derive(Debug, Clone)]
pub struct TransactionBatch {
    /// Input header, including any optional extra columns
    pub headers: Vec<String>,
    pub records: Vec<TransactionRecord>,
    /// Rows removed under the drop policy
    pub dropped_rows: usize,
}

impl TransactionBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl TransactionRecord {
    /// Build a record directly; the raw cells mirror the required columns
    pub fn new(
        row_index: usize,
        timestamp: DateTime<Utc>,
        merchant: &str,
        amount: f64,
        mcc: i64,
        city: &str,
        country: &str,
        channel: &str,
    ) -> Self {
        let raw = vec![
            timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            merchant.to_string(),
            amount.to_string(),
            mcc.to_string(),
            city.to_string(),
            country.to_string(),
            channel.to_string(),
        ];
        Self {
            row_index,
            timestamp,
            merchant: merchant.to_string(),
            amount,
            mcc,
            city: city.to_string(),
            country: country.to_string(),
            channel: channel.to_string(),
            raw,
        }
    }
}

impl TransactionBatch {
    /// Batch over the required columns only
    pub fn from_records(records: Vec<TransactionRecord>) -> Self {
        Self {
            headers: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records,
            dropped_rows: 0,
        }
    }
}
