//! Serialized model artifacts, as emitted by the training pipeline.
//!
//! ```json
//! {
//!   "asset": "BTC",
//!   "version": "2025.11.0",
//!   "kind": "autoregressive",
//!   "min_history": 60,
//!   "min_horizon_days": 1,
//!   "max_horizon_days": 30,
//!   "intercept": 0.0004,
//!   "coefficients": [0.05, -0.02],
//!   "residual_std": 0.031
//! }
//! ```

use super::{AutoregressiveModel, DriftModel, Forecaster, ModelError, DEFAULT_CONFIDENCE_Z};
use crate::domain::{AssetId, Horizon};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_confidence_z() -> f64 {
    DEFAULT_CONFIDENCE_Z
}

fn default_min_horizon() -> u32 {
    1
}

/// Model family and its fitted parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    Drift {
        window: usize,
    },
    Autoregressive {
        intercept: f64,
        coefficients: Vec<f64>,
        residual_std: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub asset: AssetId,
    pub version: String,
    /// Points the model needs before it will forecast at all.
    pub min_history: usize,
    /// Extra points required per day of horizon.
    #[serde(default)]
    pub history_per_horizon_day: usize,
    #[serde(default = "default_min_horizon")]
    pub min_horizon_days: u32,
    pub max_horizon_days: u32,
    #[serde(default = "default_confidence_z")]
    pub confidence_z: f64,
    #[serde(flatten)]
    pub kind: ModelKind,
}

impl ModelArtifact {
    /// Decode and validate an artifact.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ModelError> {
        let artifact: Self = serde_json::from_slice(bytes)
            .map_err(|e| ModelError::InvalidArtifact(format!("decode: {e}")))?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Points the model needs for `horizon`.
    pub fn required_history(&self, horizon: Horizon) -> usize {
        self.min_history + self.history_per_horizon_day * horizon.as_days() as usize
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::InvalidArtifact(msg));

        if self.version.trim().is_empty() {
            return invalid("empty version".into());
        }
        if self.min_horizon_days == 0 || self.max_horizon_days < self.min_horizon_days {
            return invalid(format!(
                "bad horizon range {}..={} days",
                self.min_horizon_days, self.max_horizon_days
            ));
        }
        if !(self.confidence_z.is_finite() && self.confidence_z >= 0.0) {
            return invalid(format!("bad confidence_z {}", self.confidence_z));
        }

        let structural_need = match &self.kind {
            ModelKind::Drift { window } => {
                if *window < 2 {
                    return invalid(format!("drift window {window} is below 2"));
                }
                window + 1
            }
            ModelKind::Autoregressive {
                intercept,
                coefficients,
                residual_std,
            } => {
                let all_finite = coefficients.iter().chain([intercept, residual_std]).all(|v| v.is_finite());
                if !all_finite || *residual_std < 0.0 {
                    return invalid("non-finite or negative AR parameters".into());
                }
                coefficients.len() + 1
            }
        };
        if self.min_history < structural_need {
            return invalid(format!(
                "min_history {} is below the {structural_need} points the model reads",
                self.min_history
            ));
        }
        Ok(())
    }

    /// Instantiate the forecaster.
    pub fn build(&self) -> Arc<dyn Forecaster> {
        match &self.kind {
            ModelKind::Drift { window } => Arc::new(DriftModel {
                window: *window,
                confidence_z: self.confidence_z,
            }),
            ModelKind::Autoregressive {
                intercept,
                coefficients,
                residual_std,
            } => Arc::new(AutoregressiveModel {
                intercept: *intercept,
                coefficients: coefficients.clone(),
                residual_std: *residual_std,
                confidence_z: self.confidence_z,
            }),
        }
    }
}
