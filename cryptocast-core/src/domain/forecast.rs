//! Forecast value objects.

use super::asset::AssetId;
use super::series::SnapshotId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Forward span of a forecast, in whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Horizon(u32);

impl Horizon {
    /// `None` for a zero-day horizon.
    pub fn days(days: u32) -> Option<Self> {
        (days > 0).then_some(Self(days))
    }

    /// Zero is raised to one day.
    pub fn clamped(days: u32) -> Self {
        Self(days.max(1))
    }

    pub fn as_days(self) -> u32 {
        self.0
    }

    pub fn as_duration(self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.0))
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.0)
    }
}

impl FromStr for Horizon {
    type Err = String;

    /// Accepts `7` or `7d`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_end_matches(['d', 'D']);
        let days: u32 = digits
            .parse()
            .map_err(|_| format!("invalid horizon '{s}'"))?;
        Self::days(days).ok_or_else(|| "horizon must be at least one day".to_string())
    }
}

/// One predicted value with its confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
}

/// A finished forecast plus the provenance needed to reproduce it.
///
/// Bundles are never mutated after creation. `(asset, horizon,
/// source_snapshot_id)` identifies a bundle for idempotent re-reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBundle {
    pub asset: AssetId,
    pub horizon: Horizon,
    pub predicted_points: Vec<PredictedPoint>,
    pub source_snapshot_id: SnapshotId,
    pub model_version: String,
    pub generated_at: DateTime<Utc>,
    /// When the source series was last refreshed; lets the consumer decide
    /// whether to show a staleness indicator.
    pub source_refreshed_at: Option<DateTime<Utc>>,
    /// Whether the source snapshot was past the staleness threshold.
    pub stale_source: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_day_horizon_is_rejected() {
        assert!(Horizon::days(0).is_none());
        assert_eq!(Horizon::days(7).unwrap().as_days(), 7);
    }

    #[test]
    fn horizon_display() {
        assert_eq!(Horizon::days(30).unwrap().to_string(), "30d");
        assert_eq!(
            Horizon::days(2).unwrap().as_duration(),
            chrono::Duration::days(2)
        );
    }

    #[test]
    fn horizon_parses_with_or_without_suffix() {
        assert_eq!("7".parse::<Horizon>().unwrap(), Horizon::days(7).unwrap());
        assert_eq!("14d".parse::<Horizon>().unwrap().as_days(), 14);
        assert!("0d".parse::<Horizon>().is_err());
        assert!("week".parse::<Horizon>().is_err());
        assert_eq!(Horizon::clamped(0).as_days(), 1);
    }
}
