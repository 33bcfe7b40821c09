//! Quantile rule checks for anomaly reasons.
//!
//! Used when no surrogate can be fitted, or when configured. Continuous rules
//! fire when a row's value reaches the batch quantile and is strictly above
//! the batch minimum, so a column that is constant across the batch never
//! explains anything.

use crate::explain::phrases::{Direction, PhraseBook};
use crate::feature_extractor::{EngineeredBatch, FeatureVector};
use crate::numeric::quantile;

struct Cutoff {
    threshold: f64,
    min: f64,
}

impl Cutoff {
    fn over(values: &[f64], q: f64) -> Self {
        let threshold = quantile(values, q).unwrap_or(f64::INFINITY);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        Self { threshold, min }
    }

    fn hit(&self, value: f64) -> bool {
        value.is_finite() && value >= self.threshold && value > self.min
    }
}

/// Batch-level cutoffs for the continuous rules
pub struct RuleExplainer {
    phrases: PhraseBook,
    z_abs: Cutoff,
    hour_dev: Cutoff,
    days_since: Cutoff,
    novelty: Cutoff,
}

impl RuleExplainer {
    /// Compute the rule cutoffs over the whole batch
    pub fn fit(batch: &EngineeredBatch, rule_quantile: f64) -> Self {
        let z_abs = column(batch, |f| f.z_amount_merchant.abs());
        let hour_dev = column(batch, |f| f.hour_dev);
        // First sightings carry no gap
        let days_since = column(batch, |f| f.days_since_merchant.max(0) as f64);
        let novelty = column(batch, |f| f.merchant_novelty);

        Self {
            phrases: PhraseBook::new(),
            z_abs: Cutoff::over(&z_abs, rule_quantile),
            hour_dev: Cutoff::over(&hour_dev, rule_quantile),
            days_since: Cutoff::over(&days_since, rule_quantile),
            novelty: Cutoff::over(&novelty, rule_quantile),
        }
    }

    /// Reasons for one row, in rule order, at most `max_reasons`
    pub fn reasons(&self, batch: &EngineeredBatch, row: usize, max_reasons: usize) -> Vec<String> {
        let Some(engineered) = batch.rows.get(row) else {
            return Vec::new();
        };
        let f = &engineered.features;
        let record = &engineered.record;
        let mut reasons = Vec::new();

        if self.z_abs.hit(f.z_amount_merchant.abs()) {
            let direction = Direction::of(f.z_amount_merchant, 0.0);
            reasons.extend(self.phrase("z_amount_merchant", direction));
        }
        if self.hour_dev.hit(f.hour_dev) {
            reasons.extend(self.phrase("hour_dev", Direction::Above));
        }
        if self.days_since.hit(f.days_since_merchant.max(0) as f64) {
            reasons.extend(self.phrase("days_since_merchant", Direction::Above));
        }
        if self.novelty.hit(f.merchant_novelty) {
            reasons.extend(self.phrase("merchant_novelty", Direction::Above));
        }
        if f.city_freq <= 1 {
            reasons.push(format!("Unfamiliar city {}", record.city));
        }
        if f.country_freq <= 1 {
            reasons.push(format!("Unfamiliar country {}", record.country));
        }
        if f.is_odd_hour {
            reasons.extend(self.phrase("is_odd_hour", Direction::Above));
        }
        if f.is_online {
            reasons.extend(self.phrase("is_online", Direction::Above));
        }

        reasons.truncate(max_reasons);
        reasons
    }

    fn phrase(&self, feature: &str, direction: Direction) -> Option<String> {
        self.phrases.numeric(feature, direction).map(str::to_string)
    }
}

fn column<F>(batch: &EngineeredBatch, value: F) -> Vec<f64>
where
    F: Fn(&FeatureVector) -> f64,
{
    batch.rows.iter().map(|r| value(&r.features)).collect()
}
