//! Forecast service: cached series + registry model → versioned bundle.
//!
//! Reads only from the series cache, never from the provider, so forecast
//! latency does not depend on upstream availability. A stale snapshot is
//! still served; the service just asks for a refresh in the background and
//! flags the bundle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use cryptocast_core::cache::{FreshnessState, SeriesCache};
use cryptocast_core::domain::{AssetId, ForecastBundle, Horizon, SnapshotId};
use cryptocast_core::model::{ModelError, ModelRegistry, RegistryError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::worker::RefreshTrigger;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("no price history available for {asset} ({state})")]
    SeriesUnavailable { asset: AssetId, state: &'static str },

    #[error("{asset} has {have} points, {horizon} forecast needs {need}")]
    InsufficientHistory {
        asset: AssetId,
        horizon: Horizon,
        have: usize,
        need: usize,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Model-internal failure. The message names the model, not its internals.
    #[error("model {model_version} could not forecast {asset}")]
    Model {
        asset: AssetId,
        model_version: String,
        #[source]
        source: ModelError,
    },
}

/// Bundles keyed by `(asset, horizon)`, valid for one snapshot each.
#[derive(Debug, Default)]
pub struct ForecastMemo {
    entries: Mutex<HashMap<(AssetId, Horizon), ForecastBundle>>,
}

impl ForecastMemo {
    fn get(
        &self,
        asset: AssetId,
        horizon: Horizon,
        snapshot_id: SnapshotId,
        model_version: &str,
        stale_source: bool,
    ) -> Option<ForecastBundle> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(&(asset, horizon)).and_then(|b| {
            (b.source_snapshot_id == snapshot_id
                && b.model_version == model_version
                && b.stale_source == stale_source)
                .then(|| b.clone())
        })
    }

    /// Store `bundle`, dropping every entry of the same asset built from an
    /// older snapshot.
    fn insert(&self, bundle: ForecastBundle) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let (asset, snapshot) = (bundle.asset, bundle.source_snapshot_id);
        entries.retain(|(a, _), b| *a != asset || b.source_snapshot_id >= snapshot);
        entries.insert((asset, bundle.horizon), bundle);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ForecastService {
    cache: Arc<SeriesCache>,
    registry: Arc<ModelRegistry>,
    trigger: Arc<dyn RefreshTrigger>,
    memo: ForecastMemo,
}

impl ForecastService {
    pub fn new(
        cache: Arc<SeriesCache>,
        registry: Arc<ModelRegistry>,
        trigger: Arc<dyn RefreshTrigger>,
    ) -> Self {
        Self {
            cache,
            registry,
            trigger,
            memo: ForecastMemo::default(),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn memo(&self) -> &ForecastMemo {
        &self.memo
    }

    pub fn forecast(&self, asset: AssetId, horizon: Horizon) -> Result<ForecastBundle, ForecastError> {
        self.forecast_at(asset, horizon, Utc::now())
    }

    /// [`forecast`](Self::forecast) as of `now`.
    pub fn forecast_at(
        &self,
        asset: AssetId,
        horizon: Horizon,
        now: DateTime<Utc>,
    ) -> Result<ForecastBundle, ForecastError> {
        let entry = self.cache.read_at(asset, now);
        let series = entry.series;

        let stale = entry.state != FreshnessState::Fresh
            && series.age(now).map_or(true, |age| age > self.cache.staleness_threshold());
        if stale && entry.state != FreshnessState::Refreshing {
            debug!(asset = %asset, state = entry.state.label(), "stale snapshot, refresh requested");
            self.trigger.request_refresh(asset);
        }

        if series.is_empty() {
            return Err(ForecastError::SeriesUnavailable {
                asset,
                state: entry.state.label(),
            });
        }

        let model = self.registry.get_model(asset, horizon)?;
        let need = model.required_history(horizon);
        if series.len() < need {
            return Err(ForecastError::InsufficientHistory {
                asset,
                horizon,
                have: series.len(),
                need,
            });
        }

        let model_version = model.model_version();
        if let Some(hit) = self.memo.get(asset, horizon, series.snapshot_id(), &model_version, stale) {
            return Ok(hit);
        }

        let predicted_points = model.predict(&series, horizon).map_err(|source| match source {
            ModelError::InsufficientInput { have, need } => ForecastError::InsufficientHistory {
                asset,
                horizon,
                have,
                need,
            },
            source => {
                warn!(asset = %asset, model = %model_version, error = %source, "model failed");
                ForecastError::Model {
                    asset,
                    model_version: model_version.clone(),
                    source,
                }
            }
        })?;

        let bundle = ForecastBundle {
            asset,
            horizon,
            predicted_points,
            source_snapshot_id: series.snapshot_id(),
            model_version,
            generated_at: now,
            source_refreshed_at: series.last_refreshed(),
            stale_source: stale,
        };
        self.memo.insert(bundle.clone());
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptocast_core::domain::PredictedPoint;

    fn bundle(asset: AssetId, days: u32, snapshot: u64) -> ForecastBundle {
        ForecastBundle {
            asset,
            horizon: Horizon::clamped(days),
            predicted_points: vec![PredictedPoint {
                timestamp: Utc::now(),
                value: 1.0,
                confidence_low: 0.5,
                confidence_high: 1.5,
            }],
            source_snapshot_id: SnapshotId(snapshot),
            model_version: "1+deadbeef".into(),
            generated_at: Utc::now(),
            source_refreshed_at: None,
            stale_source: false,
        }
    }

    #[test]
    fn memo_hits_only_on_matching_snapshot() {
        let memo = ForecastMemo::default();
        memo.insert(bundle(AssetId::Btc, 7, 3));
        let h = Horizon::clamped(7);
        assert!(memo.get(AssetId::Btc, h, SnapshotId(3), "1+deadbeef", false).is_some());
        assert!(memo.get(AssetId::Btc, h, SnapshotId(4), "1+deadbeef", false).is_none());
        assert!(memo.get(AssetId::Btc, h, SnapshotId(3), "2+deadbeef", false).is_none());
        assert!(memo.get(AssetId::Btc, h, SnapshotId(3), "1+deadbeef", true).is_none());
    }

    #[test]
    fn memo_evicts_superseded_snapshots_per_asset() {
        let memo = ForecastMemo::default();
        memo.insert(bundle(AssetId::Btc, 7, 3));
        memo.insert(bundle(AssetId::Btc, 14, 3));
        memo.insert(bundle(AssetId::Eth, 7, 1));
        assert_eq!(memo.len(), 3);

        memo.insert(bundle(AssetId::Btc, 7, 4));
        // BTC 14d from snapshot 3 is gone, ETH untouched.
        assert_eq!(memo.len(), 2);
        assert!(memo
            .get(AssetId::Eth, Horizon::clamped(7), SnapshotId(1), "1+deadbeef", false)
            .is_some());
    }

    #[test]
    fn errors_render_for_display() {
        let e = ForecastError::InsufficientHistory {
            asset: AssetId::Sol,
            horizon: Horizon::clamped(7),
            have: 3,
            need: 30,
        };
        assert_eq!(e.to_string(), "SOL has 3 points, 7d forecast needs 30");
        let e = ForecastError::SeriesUnavailable {
            asset: AssetId::Btc,
            state: "STALE",
        };
        assert_eq!(e.to_string(), "no price history available for BTC (STALE)");
    }
}
