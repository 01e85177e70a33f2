//! Forecast models and the per-asset model registry.
//!
//! Training happens elsewhere; this module only loads the artifacts it
//! emits and evaluates them. Every model exposes the same capability,
//! [`Forecaster::predict`], and must be a pure function of its inputs so
//! that the same snapshot and model version give bit-identical output.

pub mod artifact;
pub mod autoregressive;
pub mod drift;
pub mod registry;

pub use artifact::{ModelArtifact, ModelKind};
pub use autoregressive::AutoregressiveModel;
pub use drift::DriftModel;
pub use registry::{ModelHandle, ModelRegistry, RegistryError};

use crate::domain::{Horizon, PredictedPoint, Series};
use thiserror::Error;

/// Two-sided 95% normal quantile used for confidence bands.
pub const DEFAULT_CONFIDENCE_Z: f64 = 1.96;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("model needs {need} points, series has {have}")]
    InsufficientInput { have: usize, need: usize },

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("invalid model artifact: {0}")]
    InvalidArtifact(String),
}

/// Uniform prediction capability over a price series.
pub trait Forecaster: Send + Sync + std::fmt::Debug {
    /// One predicted point per day of `horizon`, starting the day after the
    /// last point of `series`.
    fn predict(&self, series: &Series, horizon: Horizon) -> Result<Vec<PredictedPoint>, ModelError>;
}

/// Daily log returns of the close prices.
pub(crate) fn log_returns(closes: &[f64]) -> Result<Vec<f64>, ModelError> {
    if let Some(bad) = closes.iter().find(|c| !(c.is_finite() && **c > 0.0)) {
        return Err(ModelError::Numerical(format!("close price {bad} has no logarithm")));
    }
    Ok(closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect())
}

/// Project `cumulative[k-1]` log returns off `last_close` into dated points
/// with a `z * sigma * sqrt(k)` band.
pub(crate) fn project(
    series: &Series,
    cumulative: &[f64],
    sigma: f64,
    z: f64,
) -> Result<Vec<PredictedPoint>, ModelError> {
    let last = series
        .last()
        .ok_or_else(|| ModelError::InsufficientInput { have: 0, need: 1 })?;

    let mut out = Vec::with_capacity(cumulative.len());
    for (i, &cum) in cumulative.iter().enumerate() {
        let step = (i + 1) as f64;
        let spread = z * sigma * step.sqrt();
        let point = PredictedPoint {
            timestamp: last.timestamp + chrono::Duration::days(i as i64 + 1),
            value: last.close * cum.exp(),
            confidence_low: last.close * (cum - spread).exp(),
            confidence_high: last.close * (cum + spread).exp(),
        };
        if ![point.value, point.confidence_low, point.confidence_high]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(ModelError::Numerical(format!("non-finite prediction at step {}", i + 1)));
        }
        out.push(point);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_returns_of_doubling() {
        let r = log_returns(&[1.0, 2.0, 4.0]).unwrap();
        assert_eq!(r.len(), 2);
        assert!((r[0] - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn log_returns_reject_zero_price() {
        assert!(matches!(log_returns(&[1.0, 0.0]), Err(ModelError::Numerical(_))));
    }
}
