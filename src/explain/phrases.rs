//! Human-readable phrases for model features

use crate::models::transform::TransformedFeature;

/// Side of the reference value a feature sits on for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn of(value: f64, reference: f64) -> Self {
        if value >= reference {
            Direction::Above
        } else {
            Direction::Below
        }
    }
}

/// (feature, phrase when above reference, phrase when below)
const NUMERIC_PHRASES: &[(&str, &str, &str)] = &[
    ("amount", "Transaction amount unusually high", "Transaction amount unusually low"),
    ("hour", "Late hour of day", "Early hour of day"),
    ("weekday", "Transaction late in the week", "Transaction early in the week"),
    ("month", "Transaction late in the year", "Transaction early in the year"),
    ("merchant_freq", "Merchant used heavily in this batch", "Merchant rarely seen in this batch"),
    ("mcc_freq", "Common merchant category", "Uncommon merchant category"),
    ("merchant_avg", "Merchant with high average spend", "Merchant with low average spend"),
    ("amount_dev", "Amount unusually high for this merchant", "Amount unusually low for this merchant"),
    (
        "z_amount_merchant",
        "Amount far above this merchant's typical range",
        "Amount far below this merchant's typical range",
    ),
    (
        "days_since_merchant",
        "Long gap since this merchant was last used",
        "First or repeated use of this merchant in a short span",
    ),
    ("is_online", "Online transaction", "In-person transaction"),
    ("merchant_novelty", "Unfamiliar merchant", "Familiar merchant"),
    ("hour_dev", "Unusual time of day for this merchant", "Typical time of day for this merchant"),
    ("is_odd_hour", "Transaction during off-hours", "Transaction during regular hours"),
];

/// Raw identifier prefixes of one-hot columns, longest first
const CATEGORY_PREFIXES: &[(&str, &str)] = &[
    ("merchant_", "merchant"),
    ("country_", "country"),
    ("channel_", "channel"),
    ("city_", "city"),
    ("mcc_", "mcc"),
];

pub const GENERIC_FRAUD_REASON: &str = "Elevated fraud probability with no single dominant factor";
pub const GENERIC_ANOMALY_REASON: &str = "Unusual combination of transaction attributes within this batch";

/// Lookup table from feature identifiers to reason phrases
#[derive(Debug, Clone, Copy, Default)]
pub struct PhraseBook;

impl PhraseBook {
    pub fn new() -> Self {
        Self
    }

    pub fn numeric(&self, feature: &str, direction: Direction) -> Option<&'static str> {
        NUMERIC_PHRASES
            .iter()
            .find(|(name, _, _)| *name == feature)
            .map(|(_, above, below)| match direction {
                Direction::Above => *above,
                Direction::Below => *below,
            })
    }

    /// Phrase for a categorical value, interpolating the value into its column's template
    pub fn categorical(&self, column: &str, value: &str) -> String {
        match column {
            "merchant" => format!("Transaction at merchant {}", value),
            "mcc" => format!("Merchant category {}", value),
            "city" => format!("Transaction in {}", value),
            "country" => format!("Transaction from country {}", value),
            "channel" => format!("{} channel", value),
            _ => format!("{} is {}", humanize(column), value),
        }
    }

    /// Phrase for one transformed model column
    pub fn describe(&self, feature: &TransformedFeature, direction: Direction) -> String {
        match &feature.category {
            Some(value) => self.categorical(&feature.source, value),
            None => match self.numeric(&feature.source, direction) {
                Some(phrase) => phrase.to_string(),
                None => self.from_identifier(&feature.name, direction),
            },
        }
    }

    /// Prefix-based fallback for raw identifiers such as `num__amount` or `cat__city_Austin`
    pub fn from_identifier(&self, identifier: &str, direction: Direction) -> String {
        if let Some(rest) = identifier.strip_prefix("num__") {
            return match self.numeric(rest, direction) {
                Some(phrase) => phrase.to_string(),
                None => {
                    let side = match direction {
                        Direction::Above => "high",
                        Direction::Below => "low",
                    };
                    format!("Unusually {} {}", side, humanize(rest))
                }
            };
        }

        let rest = identifier.strip_prefix("cat__").unwrap_or(identifier);
        for (prefix, column) in CATEGORY_PREFIXES {
            if let Some(value) = rest.strip_prefix(prefix) {
                if !value.is_empty() {
                    return self.categorical(column, value);
                }
            }
        }

        match self.numeric(rest, direction) {
            Some(phrase) => phrase.to_string(),
            None => format!("Unusual {}", humanize(rest)),
        }
    }
}

fn humanize(identifier: &str) -> String {
    identifier.replace('_', " ").trim().to_string()
}
