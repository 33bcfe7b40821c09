//! Parsing and validation of uploaded transaction batches.
//!
//! Input is delimited text with a header row. Required columns are looked up by
//! name; any additional columns are carried through untouched.

use crate::config::InvalidRowPolicy;
use crate::error::{PipelineError, Result};
use crate::types::transaction::{TransactionBatch, TransactionRecord, REQUIRED_COLUMNS};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, warn};

/// Cell contents treated as missing
const NULL_TOKENS: [&str; 11] = [
    "", "nan", "null", "none", "n/a", "-", "--", "?", "missing", "(blank)", "_",
];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// One unusable cell
#[derive(Debug, Clone, PartialEq)]
pub struct RowIssue {
    /// Line in the uploaded file (header is line 1)
    pub line: usize,
    pub column: &'static str,
    pub value: String,
}

impl std::fmt::Display for RowIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: invalid {} {:?}", self.line, self.column, self.value)
    }
}

/// Column positions of the required fields
struct ColumnIndex {
    timestamp: usize,
    merchant: usize,
    amount: usize,
    mcc: usize,
    city: usize,
    country: usize,
    channel: usize,
}

impl ColumnIndex {
    fn resolve(headers: &[String]) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| find(c).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Schema(format!(
                "missing required columns: {:?}",
                missing
            )));
        }

        // All present after the check above
        let at = |name: &str| find(name).unwrap_or_default();
        Ok(Self {
            timestamp: at("timestamp"),
            merchant: at("merchant"),
            amount: at("amount"),
            mcc: at("mcc"),
            city: at("city"),
            country: at("country"),
            channel: at("channel"),
        })
    }
}

/// Parse a batch from delimited bytes, applying the invalid-row policy.
pub fn parse_batch(data: &[u8], policy: InvalidRowPolicy) -> Result<TransactionBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::Schema(format!("unreadable header row: {}", e)))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let index = ColumnIndex::resolve(&headers)?;

    let mut records = Vec::new();
    let mut issues: Vec<RowIssue> = Vec::new();
    let mut dropped_rows = 0;
    let mut row_count = 0;

    for (row_index, result) in reader.records().enumerate() {
        row_count += 1;
        let line = row_index + 2;
        let row = match (result, policy) {
            (Ok(row), _) => row,
            (Err(e), InvalidRowPolicy::Reject) => {
                return Err(PipelineError::Validation(format!(
                    "line {}: malformed row: {}",
                    line, e
                )));
            }
            (Err(e), InvalidRowPolicy::Drop) => {
                debug!(line = line, error = %e, "Dropping malformed row");
                dropped_rows += 1;
                continue;
            }
        };
        let raw: Vec<String> = row.iter().map(|c| c.to_string()).collect();

        match parse_record(row_index, &raw, &index) {
            Ok(record) => records.push(record),
            Err(mut row_issues) => match policy {
                InvalidRowPolicy::Reject => issues.append(&mut row_issues),
                InvalidRowPolicy::Drop => {
                    debug!(line = line, issues = row_issues.len(), "Dropping invalid row");
                    dropped_rows += 1;
                }
            },
        }
    }

    if row_count == 0 {
        return Err(PipelineError::Schema("batch contains no data rows".to_string()));
    }

    if !issues.is_empty() {
        let shown: Vec<String> = issues.iter().take(5).map(|i| i.to_string()).collect();
        return Err(PipelineError::Validation(format!(
            "{} invalid value(s): {}",
            issues.len(),
            shown.join("; ")
        )));
    }

    if dropped_rows > 0 {
        warn!(
            dropped = dropped_rows,
            remaining = records.len(),
            "Dropped rows with invalid values"
        );
    }

    if records.is_empty() {
        return Err(PipelineError::Validation(format!(
            "all {} rows were invalid",
            row_count
        )));
    }

    Ok(TransactionBatch {
        headers,
        records,
        dropped_rows,
    })
}

fn parse_record(
    row_index: usize,
    raw: &[String],
    index: &ColumnIndex,
) -> std::result::Result<TransactionRecord, Vec<RowIssue>> {
    let line = row_index + 2;
    let mut issues = Vec::new();
    let cell = |i: usize| raw.get(i).map(|s| s.trim()).unwrap_or("");

    let text = |i: usize, column: &'static str, issues: &mut Vec<RowIssue>| {
        let value = cell(i);
        if is_null(value) {
            issues.push(RowIssue {
                line,
                column,
                value: value.to_string(),
            });
        }
        value.to_string()
    };

    let merchant = text(index.merchant, "merchant", &mut issues);
    let city = text(index.city, "city", &mut issues);
    let country = text(index.country, "country", &mut issues);
    let channel = text(index.channel, "channel", &mut issues);

    let timestamp = parse_timestamp(cell(index.timestamp));
    if timestamp.is_none() {
        issues.push(RowIssue {
            line,
            column: "timestamp",
            value: cell(index.timestamp).to_string(),
        });
    }

    let amount = parse_amount(cell(index.amount));
    if amount.is_none() {
        issues.push(RowIssue {
            line,
            column: "amount",
            value: cell(index.amount).to_string(),
        });
    }

    let mcc = parse_mcc(cell(index.mcc));
    if mcc.is_none() {
        issues.push(RowIssue {
            line,
            column: "mcc",
            value: cell(index.mcc).to_string(),
        });
    }

    match (timestamp, amount, mcc) {
        (Some(timestamp), Some(amount), Some(mcc)) if issues.is_empty() => Ok(TransactionRecord {
            row_index,
            timestamp,
            merchant,
            amount,
            mcc,
            city,
            country,
            channel,
            raw: raw.to_vec(),
        }),
        _ => Err(issues),
    }
}

fn is_null(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    NULL_TOKENS.contains(&lowered.as_str())
}

/// Parse a timestamp; naive values are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }
    None
}

/// Parse an amount, stripping currency symbols and separators when the plain
/// text is not already a number. Scientific notation is accepted.
///
/// Negative and non-finite amounts are rejected.
pub fn parse_amount(value: &str) -> Option<f64> {
    if is_null(value) {
        return None;
    }
    let amount = match value.trim().parse::<f64>() {
        Ok(amount) => amount,
        Err(_) => strip_decorations(value).parse().ok()?,
    };
    (amount.is_finite() && amount >= 0.0).then_some(amount)
}

/// Keep the characters of a number; an exponent marker survives only between
/// a mantissa digit and its exponent
fn strip_decorations(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    chars
        .iter()
        .enumerate()
        .filter(|&(i, &c)| match c {
            '0'..='9' | '.' | '-' | '+' => true,
            'e' | 'E' => {
                let after_digit = i > 0 && (chars[i - 1].is_ascii_digit() || chars[i - 1] == '.');
                let before_exponent = chars
                    .get(i + 1)
                    .map_or(false, |n| n.is_ascii_digit() || *n == '+' || *n == '-');
                after_digit && before_exponent
            }
            _ => false,
        })
        .map(|(_, &c)| c)
        .collect()
}

/// Parse an integer-like merchant category code ("5411" or "5411.0").
pub fn parse_mcc(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(code) = value.parse::<i64>() {
        return Some(code);
    }
    let float: f64 = value.parse().ok()?;
    (float.is_finite() && float.fract() == 0.0).then_some(float as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const HEADER: &str = "timestamp,merchant,amount,mcc,city,country,channel";

    #[test]
    fn test_parse_valid_batch_with_extra_column() {
        let data = format!(
            "{},note\n2024-01-05 10:15:00,Corner Cafe,\"$1,200.50\",5812,Austin,US,POS,first\n2024-01-06T08:00:00Z,Fuel Stop,40,5541.0,Dallas,US,ONLINE,\n",
            HEADER
        );

        let batch = parse_batch(data.as_bytes(), InvalidRowPolicy::Reject).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.headers.last().unwrap(), "note");
        assert_eq!(batch.records[0].amount, 1200.50);
        assert_eq!(batch.records[0].raw[7], "first");
        assert_eq!(batch.records[1].mcc, 5541);
        assert_eq!(batch.records[1].timestamp.hour(), 8);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let data = "timestamp,merchant,amount,city,country,channel\n2024-01-05,A,1,X,US,POS\n";
        let err = parse_batch(data.as_bytes(), InvalidRowPolicy::Reject).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Schema);
        assert!(err.to_string().contains("mcc"));
    }

    #[test]
    fn test_empty_batch_is_schema_error() {
        let data = format!("{}\n", HEADER);
        let err = parse_batch(data.as_bytes(), InvalidRowPolicy::Drop).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Schema);
    }

    #[test]
    fn test_invalid_timestamp_reject_policy() {
        let data = format!(
            "{}\n2024-01-05 10:15:00,A,10,5812,X,US,POS\nnot-a-date,B,10,5812,X,US,POS\n",
            HEADER
        );
        let err = parse_batch(data.as_bytes(), InvalidRowPolicy::Reject).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_invalid_timestamp_drop_policy() {
        let data = format!(
            "{}\n2024-01-05 10:15:00,A,10,5812,X,US,POS\nnot-a-date,B,10,5812,X,US,POS\n",
            HEADER
        );
        let batch = parse_batch(data.as_bytes(), InvalidRowPolicy::Drop).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.dropped_rows, 1);
        assert_eq!(batch.records[0].merchant, "A");
    }

    #[test]
    fn test_malformed_row_reject_policy() {
        let data = format!(
            "{}\n2024-01-05 10:15:00,A,10,5812,X,US,POS\n2024-01-05 11:00:00,B,10,5812,X,US\n",
            HEADER
        );
        let err = parse_batch(data.as_bytes(), InvalidRowPolicy::Reject).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_malformed_row_drop_policy() {
        let data = format!(
            "{}\n2024-01-05 10:15:00,A,10,5812,X,US,POS\n2024-01-05 11:00:00,B,10,5812,X,US\n2024-01-05 12:00:00,C,12,5812,X,US,POS\n",
            HEADER
        );
        let batch = parse_batch(data.as_bytes(), InvalidRowPolicy::Drop).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dropped_rows, 1);
        assert_eq!(batch.records[1].merchant, "C");
        assert_eq!(batch.records[1].row_index, 2);
    }

    #[test]
    fn test_all_rows_dropped_fails() {
        let data = format!("{}\nbad,B,10,5812,X,US,POS\n", HEADER);
        let err = parse_batch(data.as_bytes(), InvalidRowPolicy::Drop).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_negative_amount_and_null_cells() {
        assert_eq!(parse_amount("-5"), None);
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount("USD 12.00"), Some(12.0));
        assert_eq!(parse_amount("EUR 5"), Some(5.0));
    }

    #[test]
    fn test_scientific_notation_amounts() {
        assert_eq!(parse_amount("1e3"), Some(1000.0));
        assert_eq!(parse_amount("1.5E+3"), Some(1500.0));
        assert_eq!(parse_amount("2.5e-05"), Some(2.5e-5));
        assert_eq!(parse_amount("$1.2e2"), Some(120.0));
        assert_eq!(parse_amount("1e999"), None);
        assert_eq!(parse_amount("-1e3"), None);
    }

    #[test]
    fn test_null_cell_rejects_batch() {
        let data = format!("{}\n2024-01-05,A,10,5812,null,US,POS\n", HEADER);
        let err = parse_batch(data.as_bytes(), InvalidRowPolicy::Reject).unwrap_err();
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn test_timestamp_formats() {
        let ts = parse_timestamp("03/15/2024 23:45").unwrap();
        assert_eq!((ts.month(), ts.day(), ts.hour()), (3, 15, 23));

        let ts = parse_timestamp("2024-03-15T01:02:03+02:00").unwrap();
        assert_eq!(ts.hour(), 23);

        let ts = parse_timestamp("2024-03-15").unwrap();
        assert_eq!(ts.hour(), 0);

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_mcc_parsing() {
        assert_eq!(parse_mcc("5411"), Some(5411));
        assert_eq!(parse_mcc("5411.0"), Some(5411));
        assert_eq!(parse_mcc("54.5"), None);
        assert_eq!(parse_mcc("grocery"), None);
    }
}
