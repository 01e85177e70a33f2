//! Model registry: one loaded model per asset, read-only after startup.

use super::{Forecaster, ModelArtifact, ModelError};
use crate::domain::{AssetId, Horizon, PredictedPoint, Series};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("no model loaded for {asset}")]
    NoModel { asset: AssetId },

    #[error("model {model_version} for {asset} does not cover horizon {horizon} (supports {min}..={max} days)")]
    NoModelForHorizon {
        asset: AssetId,
        horizon: Horizon,
        model_version: String,
        min: u32,
        max: u32,
    },

    #[error("failed to load model from {path}: {reason}")]
    Load { path: PathBuf, reason: String },
}

/// A loaded, validated model bound to one asset.
#[derive(Clone)]
pub struct ModelHandle {
    artifact: Arc<ModelArtifact>,
    artifact_hash: blake3::Hash,
    forecaster: Arc<dyn Forecaster>,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("asset", &self.artifact.asset)
            .field("model_version", &self.model_version())
            .field("forecaster", &self.forecaster)
            .finish()
    }
}

impl ModelHandle {
    /// Wrap an artifact that has already passed `validate`. `raw` is the
    /// exact bytes it was loaded from and feeds the content hash.
    fn new(artifact: ModelArtifact, raw: &[u8]) -> Self {
        let forecaster = artifact.build();
        Self {
            artifact: Arc::new(artifact),
            artifact_hash: blake3::hash(raw),
            forecaster,
        }
    }

    /// Build from an in-memory artifact; the hash covers its JSON encoding.
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelError> {
        artifact.validate()?;
        let raw = serde_json::to_vec(&artifact)
            .map_err(|e| ModelError::InvalidArtifact(format!("encode: {e}")))?;
        Ok(Self::new(artifact, &raw))
    }

    pub fn asset(&self) -> AssetId {
        self.artifact.asset
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// `"{version}+{first 8 hex chars of the artifact hash}"`.
    ///
    /// Two artifacts that share a declared version but differ in content
    /// get distinct identifiers.
    pub fn model_version(&self) -> String {
        let hex = self.artifact_hash.to_hex();
        format!("{}+{}", self.artifact.version, &hex.as_str()[..8])
    }

    pub fn supports(&self, horizon: Horizon) -> bool {
        (self.artifact.min_horizon_days..=self.artifact.max_horizon_days).contains(&horizon.as_days())
    }

    pub fn required_history(&self, horizon: Horizon) -> usize {
        self.artifact.required_history(horizon)
    }

    pub fn predict(&self, series: &Series, horizon: Horizon) -> Result<Vec<PredictedPoint>, ModelError> {
        self.forecaster.predict(series, horizon)
    }
}

/// Per-asset model lookup.
///
/// Populated once at startup and never mutated afterwards, so concurrent
/// lookups need no locking.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<AssetId, ModelHandle>,
    failures: Vec<RegistryError>,
}

impl ModelRegistry {
    /// Load `{dir}/{ticker}.json` for every asset (ticker lowercased).
    ///
    /// A missing or broken artifact only disables its own asset; the
    /// failure is logged and kept for [`load_failures`](Self::load_failures).
    pub fn load_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut registry = Self::default();
        for asset in AssetId::ALL {
            let path = dir.join(format!("{}.json", asset.ticker().to_ascii_lowercase()));
            match load_file(asset, &path) {
                Ok(handle) => {
                    info!(asset = %asset, model = %handle.model_version(), path = %path.display(), "model loaded");
                    registry.models.insert(asset, handle);
                }
                Err(e) => {
                    warn!(asset = %asset, error = %e, "model unavailable");
                    registry.failures.push(e);
                }
            }
        }
        registry
    }

    pub fn from_handles(handles: impl IntoIterator<Item = ModelHandle>) -> Self {
        Self {
            models: handles.into_iter().map(|h| (h.asset(), h)).collect(),
            failures: Vec::new(),
        }
    }

    pub fn from_artifacts(artifacts: impl IntoIterator<Item = ModelArtifact>) -> Result<Self, ModelError> {
        let handles = artifacts
            .into_iter()
            .map(ModelHandle::from_artifact)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_handles(handles))
    }

    /// The model for `asset` if it covers `horizon`.
    pub fn get_model(&self, asset: AssetId, horizon: Horizon) -> Result<&ModelHandle, RegistryError> {
        let handle = self.models.get(&asset).ok_or(RegistryError::NoModel { asset })?;
        if !handle.supports(horizon) {
            return Err(RegistryError::NoModelForHorizon {
                asset,
                horizon,
                model_version: handle.model_version(),
                min: handle.artifact.min_horizon_days,
                max: handle.artifact.max_horizon_days,
            });
        }
        Ok(handle)
    }

    pub fn model(&self, asset: AssetId) -> Option<&ModelHandle> {
        self.models.get(&asset)
    }

    /// Assets with a loaded model, in [`AssetId::ALL`] order.
    pub fn available(&self) -> Vec<AssetId> {
        AssetId::ALL
            .into_iter()
            .filter(|a| self.models.contains_key(a))
            .collect()
    }

    pub fn load_failures(&self) -> &[RegistryError] {
        &self.failures
    }

    /// Points the cache must always retain for `asset` so that every
    /// supported horizon stays servable.
    pub fn retention_floor(&self, asset: AssetId) -> usize {
        self.models
            .get(&asset)
            .map(|h| h.required_history(Horizon::clamped(h.artifact.max_horizon_days)))
            .unwrap_or(0)
    }

    /// Largest [`retention_floor`](Self::retention_floor) over all assets.
    pub fn max_retention_floor(&self) -> usize {
        AssetId::ALL
            .into_iter()
            .map(|a| self.retention_floor(a))
            .max()
            .unwrap_or(0)
    }
}

fn load_file(asset: AssetId, path: &Path) -> Result<ModelHandle, RegistryError> {
    let load_err = |reason: String| RegistryError::Load {
        path: path.to_path_buf(),
        reason,
    };
    let raw = std::fs::read(path).map_err(|e| load_err(e.to_string()))?;
    let artifact = ModelArtifact::from_json(&raw).map_err(|e| load_err(e.to_string()))?;
    if artifact.asset != asset {
        return Err(load_err(format!("artifact is for {}, expected {asset}", artifact.asset)));
    }
    Ok(ModelHandle::new(artifact, &raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelKind;
    use std::fs;

    fn drift(asset: AssetId, version: &str, max_horizon: u32) -> ModelArtifact {
        ModelArtifact {
            asset,
            version: version.into(),
            min_history: 30,
            history_per_horizon_day: 0,
            min_horizon_days: 1,
            max_horizon_days: max_horizon,
            confidence_z: 1.96,
            kind: ModelKind::Drift { window: 20 },
        }
    }

    #[test]
    fn model_version_includes_content_hash() {
        let a = ModelHandle::from_artifact(drift(AssetId::Btc, "1.0", 30)).unwrap();
        let mut changed = drift(AssetId::Btc, "1.0", 30);
        changed.kind = ModelKind::Drift { window: 21 };
        let b = ModelHandle::from_artifact(changed).unwrap();

        assert!(a.model_version().starts_with("1.0+"));
        assert_eq!(a.model_version().len(), "1.0+".len() + 8);
        assert_ne!(a.model_version(), b.model_version());
    }

    #[test]
    fn horizon_outside_range_is_rejected() {
        let reg = ModelRegistry::from_artifacts([drift(AssetId::Eth, "1", 14)]).unwrap();
        assert!(reg.get_model(AssetId::Eth, Horizon::days(14).unwrap()).is_ok());
        assert!(matches!(
            reg.get_model(AssetId::Eth, Horizon::days(15).unwrap()),
            Err(RegistryError::NoModelForHorizon { max: 14, .. })
        ));
        assert_eq!(
            reg.get_model(AssetId::Sol, Horizon::days(1).unwrap()).unwrap_err(),
            RegistryError::NoModel { asset: AssetId::Sol }
        );
    }

    #[test]
    fn retention_floor_covers_longest_horizon() {
        let mut a = drift(AssetId::Xrp, "1", 10);
        a.history_per_horizon_day = 3;
        let reg = ModelRegistry::from_artifacts([a, drift(AssetId::Btc, "1", 30)]).unwrap();
        assert_eq!(reg.retention_floor(AssetId::Xrp), 60);
        assert_eq!(reg.retention_floor(AssetId::Btc), 30);
        assert_eq!(reg.retention_floor(AssetId::Sol), 0);
        assert_eq!(reg.max_retention_floor(), 60);
    }

    #[test]
    fn load_dir_isolates_failures_per_asset() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("btc.json"),
            serde_json::to_vec(&drift(AssetId::Btc, "2.1", 30)).unwrap(),
        )
        .unwrap();
        fs::write(dir.path().join("eth.json"), b"{ not json").unwrap();
        // Right file name, wrong asset inside.
        fs::write(
            dir.path().join("sol.json"),
            serde_json::to_vec(&drift(AssetId::Xrp, "1", 30)).unwrap(),
        )
        .unwrap();

        let reg = ModelRegistry::load_dir(dir.path());
        assert_eq!(reg.available(), vec![AssetId::Btc]);
        // eth broken, sol mismatched, xrp missing
        assert_eq!(reg.load_failures().len(), 3);
        assert!(reg
            .load_failures()
            .iter()
            .all(|e| matches!(e, RegistryError::Load { .. })));
        let btc = reg.get_model(AssetId::Btc, Horizon::days(7).unwrap()).unwrap();
        assert!(btc.model_version().starts_with("2.1+"));
    }

    #[test]
    fn invalid_artifacts_never_become_handles() {
        let mut bad = drift(AssetId::Eth, "1", 7);
        bad.kind = ModelKind::Drift { window: 1 };
        assert!(ModelHandle::from_artifact(bad.clone()).is_err());
        assert!(ModelRegistry::from_artifacts([bad.clone()]).is_err());

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("eth.json"), serde_json::to_vec(&bad).unwrap()).unwrap();
        let reg = ModelRegistry::load_dir(dir.path());
        assert!(reg.model(AssetId::Eth).is_none());
        assert!(reg
            .load_failures()
            .iter()
            .any(|e| matches!(e, RegistryError::Load { path, .. } if path.ends_with("eth.json"))));
    }

    #[test]
    fn file_hash_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("eth.json"),
            serde_json::to_vec(&drift(AssetId::Eth, "1", 7)).unwrap(),
        )
        .unwrap();
        let v1 = ModelRegistry::load_dir(dir.path()).model(AssetId::Eth).unwrap().model_version();
        let v2 = ModelRegistry::load_dir(dir.path()).model(AssetId::Eth).unwrap().model_version();
        assert_eq!(v1, v2);
    }
}
