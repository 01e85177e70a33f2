//! Drift model: geometric random walk fitted over a trailing window.

use super::{log_returns, project, Forecaster, ModelError};
use crate::domain::{Horizon, PredictedPoint, Series};

/// Extrapolates the mean daily log return of the last `window` returns;
/// the band width comes from their sample standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftModel {
    pub window: usize,
    pub confidence_z: f64,
}

impl Forecaster for DriftModel {
    fn predict(&self, series: &Series, horizon: Horizon) -> Result<Vec<PredictedPoint>, ModelError> {
        let need = self.window + 1;
        if series.len() < need {
            return Err(ModelError::InsufficientInput {
                have: series.len(),
                need,
            });
        }
        let closes = series.closes();
        let returns = log_returns(&closes[closes.len() - need..])?;

        let n = returns.len() as f64;
        let mu = returns.iter().sum::<f64>() / n;
        let sigma = if returns.len() > 1 {
            (returns.iter().map(|r| (r - mu).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        let cumulative: Vec<f64> = (1..=horizon.as_days()).map(|k| mu * f64::from(k)).collect();
        project(series, &cumulative, sigma, self.confidence_z)
    }
}
