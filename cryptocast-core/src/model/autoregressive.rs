//! Autoregressive model over daily log returns.

use super::{log_returns, project, Forecaster, ModelError};
use crate::domain::{Horizon, PredictedPoint, Series};

/// AR(p): `r[t] = intercept + Σ coefficients[i] * r[t-1-i]`.
///
/// Multi-step forecasts feed each predicted return back in as the newest
/// lag. The band assumes independent residuals with `residual_std`.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoregressiveModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub residual_std: f64,
    pub confidence_z: f64,
}

impl AutoregressiveModel {
    pub fn order(&self) -> usize {
        self.coefficients.len()
    }
}

impl Forecaster for AutoregressiveModel {
    fn predict(&self, series: &Series, horizon: Horizon) -> Result<Vec<PredictedPoint>, ModelError> {
        let p = self.order();
        let need = p + 1;
        if series.len() < need {
            return Err(ModelError::InsufficientInput {
                have: series.len(),
                need,
            });
        }
        let closes = series.closes();
        // Newest last.
        let mut lags = log_returns(&closes[closes.len() - need..])?;

        let mut cumulative = Vec::with_capacity(horizon.as_days() as usize);
        let mut total = 0.0;
        for _ in 0..horizon.as_days() {
            let next = self.intercept
                + self
                    .coefficients
                    .iter()
                    .zip(lags.iter().rev())
                    .map(|(phi, r)| phi * r)
                    .sum::<f64>();
            total += next;
            cumulative.push(total);
            lags.push(next);
            if lags.len() > p {
                lags.remove(0);
            }
        }
        project(series, &cumulative, self.residual_std, self.confidence_z)
    }
}
