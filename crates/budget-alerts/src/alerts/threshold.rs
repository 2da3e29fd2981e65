use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const CRITICAL_RATIO: f64 = 1.0;
const WARNING_RATIO: f64 = 0.85;
const CAUTION_RATIO: f64 = 0.60;

/// Severity bucket for a budget's consumption, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdTier {
    Healthy,
    Caution,
    Warning,
    Critical,
}

impl ThresholdTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdTier::Healthy => "healthy",
            ThresholdTier::Caution => "caution",
            ThresholdTier::Warning => "warning",
            ThresholdTier::Critical => "critical",
        }
    }
}

impl fmt::Display for ThresholdTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(Self::Healthy),
            "caution" => Ok(Self::Caution),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown threshold tier '{other}'")),
        }
    }
}

/// Result of evaluating a budget snapshot against its limit and thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdStatus {
    pub tier: ThresholdTier,
    /// `None` when no positive limit is configured.
    pub usage_ratio: Option<f64>,
    pub triggered_threshold: Option<f64>,
}

/// Classifies consumption against a monthly limit and absolute thresholds.
///
/// Total over its inputs: non-finite or negative amounts are read as zero and
/// non-positive thresholds are ignored.
pub fn evaluate(limit: f64, consumption: f64, thresholds: &[f64]) -> ThresholdStatus {
    let limit = sanitize_amount(limit);
    let consumption = sanitize_amount(consumption);
    let thresholds: Vec<f64> = thresholds
        .iter()
        .copied()
        .map(sanitize_amount)
        .filter(|value| *value > 0.0)
        .collect();

    let usage_ratio = if limit > 0.0 {
        Some(consumption / limit)
    } else {
        None
    };

    let highest_threshold = thresholds.iter().copied().reduce(f64::max);
    let triggered_threshold = thresholds
        .iter()
        .copied()
        .filter(|value| *value <= consumption)
        .reduce(f64::max);

    let ratio_at_least = |bound: f64| usage_ratio.map(|ratio| ratio >= bound).unwrap_or(false);

    let tier = if ratio_at_least(CRITICAL_RATIO) {
        ThresholdTier::Critical
    } else if highest_threshold
        .map(|highest| consumption >= highest)
        .unwrap_or(false)
        || ratio_at_least(WARNING_RATIO)
    {
        ThresholdTier::Warning
    } else if ratio_at_least(CAUTION_RATIO) {
        ThresholdTier::Caution
    } else {
        ThresholdTier::Healthy
    };

    ThresholdStatus {
        tier,
        usage_ratio,
        triggered_threshold,
    }
}

pub(crate) fn sanitize_amount(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
