//! PricePoint: one OHLCV bar of a price series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single asset at a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Why a point was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PointError {
    #[error("non-finite value")]
    NonFinite,

    #[error("negative price or volume")]
    Negative,

    #[error("high below open/close")]
    HighTooLow,

    #[error("low above open/close")]
    LowTooHigh,
}

impl PricePoint {
    /// Check the per-point invariants: finite, non-negative, and
    /// `high >= max(open, close)`, `low <= min(open, close)`.
    pub fn validate(&self) -> Result<(), PointError> {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PointError::NonFinite);
        }
        if values.iter().any(|v| *v < 0.0) {
            return Err(PointError::Negative);
        }
        if self.high < self.open.max(self.close) {
            return Err(PointError::HighTooLow);
        }
        if self.low > self.open.min(self.close) {
            return Err(PointError::LowTooHigh);
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}
