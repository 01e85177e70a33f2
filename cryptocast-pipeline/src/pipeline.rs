//! `MarketPipeline`: the read facade the presentation layer talks to.
//!
//! Owns the cache, registry, coordinator and refresh worker. Every read is
//! served from memory; network I/O only ever happens on the refresh thread
//! or in the explicit `refresh_*` calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cryptocast_core::cache::{CacheEntry, FreshnessState, RetentionPolicy, SeriesCache};
use cryptocast_core::config::PipelineConfig;
use cryptocast_core::data::MarketDataProvider;
use cryptocast_core::domain::{AssetId, ForecastBundle, Horizon, LiveQuote, SnapshotId};
use cryptocast_core::model::ModelRegistry;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::coordinator::{RefreshCoordinator, RefreshOutcome, RefreshPolicy};
use crate::forecast::{ForecastError, ForecastService};
use crate::worker::{RefreshMode, RefreshWorker};

/// Per-asset health line for dashboards and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetStatus {
    pub asset: AssetId,
    pub state: FreshnessState,
    pub snapshot_id: SnapshotId,
    pub points: usize,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Seconds until the next scheduled attempt; zero when due.
    pub next_attempt_in_secs: u64,
    pub refreshing: bool,
    pub model_version: Option<String>,
}

pub struct MarketPipeline {
    cache: Arc<SeriesCache>,
    registry: Arc<ModelRegistry>,
    coordinator: Arc<RefreshCoordinator>,
    forecasts: ForecastService,
    worker: RefreshWorker,
}

impl MarketPipeline {
    /// Wire everything together and start the refresh thread.
    ///
    /// The cache retention floor is raised to the longest history any
    /// loaded model needs.
    pub fn start(
        config: &PipelineConfig,
        provider: Arc<dyn MarketDataProvider>,
        registry: ModelRegistry,
        mode: RefreshMode,
    ) -> std::io::Result<Self> {
        let policy = RefreshPolicy::from_config(config);
        Self::start_with_policy(config, provider, registry, mode, policy)
    }

    /// [`start`](Self::start) with explicit timing, for tests and tools.
    pub fn start_with_policy(
        config: &PipelineConfig,
        provider: Arc<dyn MarketDataProvider>,
        registry: ModelRegistry,
        mode: RefreshMode,
        policy: RefreshPolicy,
    ) -> std::io::Result<Self> {
        let retention = RetentionPolicy::from_config(config).with_floor(registry.max_retention_floor());
        let cache = Arc::new(SeriesCache::new(config.staleness_threshold(), retention));
        let registry = Arc::new(registry);
        let coordinator = Arc::new(RefreshCoordinator::new(provider, Arc::clone(&cache), policy));
        let worker = RefreshWorker::spawn(Arc::clone(&coordinator), mode)?;
        let forecasts = ForecastService::new(
            Arc::clone(&cache),
            Arc::clone(&registry),
            Arc::new(worker.handle()),
        );

        info!(
            models = registry.available().len(),
            retention_floor = retention.floor_points,
            ?mode,
            "pipeline started"
        );
        Ok(Self {
            cache,
            registry,
            coordinator,
            forecasts,
            worker,
        })
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Points, freshness and last refresh time. Never touches the network.
    pub fn get_series(&self, asset: AssetId) -> CacheEntry {
        self.cache.read(asset)
    }

    pub fn get_forecast(&self, asset: AssetId, horizon: Horizon) -> Result<ForecastBundle, ForecastError> {
        self.forecasts.forecast(asset, horizon)
    }

    pub fn get_quote(&self, asset: AssetId) -> Option<Arc<LiveQuote>> {
        self.cache.quote(asset)
    }

    /// Forecast every asset in parallel.
    pub fn forecast_all(&self, horizon: Horizon) -> Vec<(AssetId, Result<ForecastBundle, ForecastError>)> {
        AssetId::ALL
            .par_iter()
            .map(|&asset| (asset, self.forecasts.forecast(asset, horizon)))
            .collect()
    }

    pub fn status(&self) -> Vec<AssetStatus> {
        let now = Instant::now();
        AssetId::ALL
            .into_iter()
            .map(|asset| {
                let entry = self.cache.read(asset);
                let schedule = self.coordinator.schedule(asset);
                AssetStatus {
                    asset,
                    state: entry.state,
                    snapshot_id: entry.series.snapshot_id(),
                    points: entry.series.len(),
                    last_refreshed: entry.series.last_refreshed(),
                    consecutive_failures: schedule.consecutive_failures,
                    next_attempt_in_secs: schedule.next_due.saturating_duration_since(now).as_secs(),
                    refreshing: schedule.in_flight,
                    model_version: self.registry.model(asset).map(|m| m.model_version()),
                }
            })
            .collect()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn forecasts(&self) -> &ForecastService {
        &self.forecasts
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    // ── Explicit refreshes ───────────────────────────────────────────

    /// Blocking refresh of one asset (coalesced with any in-flight one).
    pub fn refresh_now(&self, asset: AssetId) -> RefreshOutcome {
        self.coordinator.refresh(asset)
    }

    /// Blocking refresh of every asset, one thread per asset. The shared
    /// request budget still paces the upstream calls.
    pub fn refresh_all(&self) -> Vec<(AssetId, RefreshOutcome)> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = AssetId::ALL
                .into_iter()
                .map(|asset| (asset, scope.spawn(move || self.coordinator.refresh(asset))))
                .collect();
            handles
                .into_iter()
                .map(|(asset, h)| (asset, h.join().unwrap_or(RefreshOutcome::Cancelled)))
                .collect()
        })
    }

    /// Block until `asset` has a non-empty snapshot or `timeout` passes.
    pub fn wait_for_data(&self, asset: AssetId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.cache.read(asset).series.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// Stop the refresh thread. Also happens on drop.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}
