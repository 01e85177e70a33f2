//! Series cache: the single source of truth for price history.
//!
//! One slot per asset. Each slot publishes an immutable `Arc<Series>`;
//! a merge builds the next series off to the side and swaps the pointer
//! under the slot's write lock, so readers see either the old or the new
//! snapshot and never a half-merged one. Merges for one asset serialize on
//! a per-slot writer mutex; different assets never contend.

use super::retention::RetentionPolicy;
use crate::domain::{AssetId, LiveQuote, PricePoint, Series, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Freshness of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FreshnessState {
    Fresh,
    Stale,
    Refreshing,
    Failed { last_error: String },
}

impl FreshnessState {
    pub fn label(&self) -> &'static str {
        match self {
            FreshnessState::Fresh => "FRESH",
            FreshnessState::Stale => "STALE",
            FreshnessState::Refreshing => "REFRESHING",
            FreshnessState::Failed { .. } => "FAILED",
        }
    }
}

/// What a reader gets back: a snapshot plus its freshness at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub series: Arc<Series>,
    pub state: FreshnessState,
    pub quote: Option<Arc<LiveQuote>>,
}

impl CacheEntry {
    /// Whether the data is older than the staleness threshold (or was never
    /// refreshed), regardless of the stored state.
    pub fn is_past_threshold(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.series.age(now).map_or(true, |age| age > threshold)
    }
}

#[derive(Debug)]
struct Stored {
    series: Arc<Series>,
    state: FreshnessState,
    /// State to restore if an in-flight refresh is abandoned.
    before_refresh: Option<FreshnessState>,
    quote: Option<Arc<LiveQuote>>,
}

#[derive(Debug)]
struct Slot {
    writer: Mutex<()>,
    entry: RwLock<Stored>,
}

impl Slot {
    fn new(asset: AssetId) -> Self {
        Self {
            writer: Mutex::new(()),
            entry: RwLock::new(Stored {
                series: Arc::new(Series::empty(asset)),
                state: FreshnessState::Stale,
                before_refresh: None,
                quote: None,
            }),
        }
    }
}

/// Bounded per-asset time-series store with freshness tracking.
#[derive(Debug)]
pub struct SeriesCache {
    slots: [Slot; AssetId::COUNT],
    staleness_threshold: chrono::Duration,
    retention: RetentionPolicy,
}

impl SeriesCache {
    /// Empty cache: every asset starts with an empty series in `STALE`.
    pub fn new(staleness_threshold: std::time::Duration, retention: RetentionPolicy) -> Self {
        Self {
            slots: AssetId::ALL.map(Slot::new),
            staleness_threshold: chrono::Duration::from_std(staleness_threshold)
                .unwrap_or(chrono::Duration::MAX),
            retention,
        }
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        self.staleness_threshold
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    fn slot(&self, asset: AssetId) -> &Slot {
        &self.slots[asset.index()]
    }

    /// Current snapshot and freshness. Never blocks on I/O.
    pub fn read(&self, asset: AssetId) -> CacheEntry {
        self.read_at(asset, Utc::now())
    }

    /// [`read`](Self::read) evaluated at `now`: a `FRESH` entry whose data
    /// has aged past the threshold reads as `STALE`.
    pub fn read_at(&self, asset: AssetId, now: DateTime<Utc>) -> CacheEntry {
        let stored = self
            .slot(asset)
            .entry
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entry = CacheEntry {
            series: Arc::clone(&stored.series),
            state: stored.state.clone(),
            quote: stored.quote.clone(),
        };
        drop(stored);

        if entry.state == FreshnessState::Fresh
            && entry.is_past_threshold(now, self.staleness_threshold)
        {
            entry.state = FreshnessState::Stale;
        }
        entry
    }

    /// Merge `incoming` into the asset's series and publish the result.
    pub fn merge(&self, asset: AssetId, incoming: &[PricePoint]) -> SnapshotId {
        self.merge_at(asset, incoming, Utc::now())
    }

    /// Merge as of `now`.
    ///
    /// Timestamp union; on collision the incoming point replaces the cached
    /// one. The snapshot id always advances, `last_refreshed` becomes
    /// `max(previous, now)`, and the state becomes `FRESH`.
    pub fn merge_at(&self, asset: AssetId, incoming: &[PricePoint], now: DateTime<Utc>) -> SnapshotId {
        let slot = self.slot(asset);
        let _writer = slot.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = Arc::clone(
            &slot
                .entry
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .series,
        );

        let mut by_time: BTreeMap<DateTime<Utc>, PricePoint> =
            current.points().iter().map(|p| (p.timestamp, *p)).collect();
        let mut replaced = 0usize;
        let mut rejected = 0usize;
        for point in incoming {
            if let Err(reason) = point.validate() {
                rejected += 1;
                warn!(asset = %asset, timestamp = %point.timestamp, %reason, "refusing invalid point in merge");
                continue;
            }
            if by_time.insert(point.timestamp, *point).is_some() {
                replaced += 1;
            }
        }

        let mut points: Vec<PricePoint> = by_time.into_values().collect();
        let trimmed = self.retention.apply(&mut points);

        let last_refreshed = current.last_refreshed().map_or(now, |prev| prev.max(now));
        let snapshot_id = current.snapshot_id().next();
        let next = Arc::new(Series::from_sorted(asset, points, last_refreshed, snapshot_id));
        let len = next.len();

        {
            let mut stored = slot.entry.write().unwrap_or_else(PoisonError::into_inner);
            stored.series = next;
            stored.state = FreshnessState::Fresh;
            stored.before_refresh = None;
        }

        info!(
            asset = %asset,
            snapshot_id = snapshot_id.0,
            points = len,
            incoming = incoming.len(),
            replaced,
            rejected,
            trimmed,
            "published series snapshot"
        );
        snapshot_id
    }

    /// Enter `REFRESHING`, remembering the current state for
    /// [`cancel_refresh`](Self::cancel_refresh).
    pub fn mark_refreshing(&self, asset: AssetId) {
        let mut stored = self
            .slot(asset)
            .entry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if stored.state != FreshnessState::Refreshing {
            let previous = std::mem::replace(&mut stored.state, FreshnessState::Refreshing);
            stored.before_refresh = Some(previous);
        }
        debug!(asset = %asset, "entry refreshing");
    }

    /// Abandon an in-flight refresh, restoring the pre-refresh state.
    pub fn cancel_refresh(&self, asset: AssetId) {
        let mut stored = self
            .slot(asset)
            .entry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if stored.state == FreshnessState::Refreshing {
            stored.state = stored.before_refresh.take().unwrap_or(FreshnessState::Stale);
            debug!(asset = %asset, state = stored.state.label(), "refresh abandoned, state restored");
        }
    }

    /// Enter `FAILED`, keeping the last good series.
    pub fn mark_failed(&self, asset: AssetId, error: impl Into<String>) {
        let last_error = error.into();
        let mut stored = self
            .slot(asset)
            .entry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        warn!(
            asset = %asset,
            error = %last_error,
            retained_points = stored.series.len(),
            "entry marked failed"
        );
        stored.state = FreshnessState::Failed { last_error };
        stored.before_refresh = None;
    }

    /// Store the latest spot quote. Quotes do not affect freshness.
    pub fn set_quote(&self, quote: LiveQuote) {
        let asset = quote.asset;
        let mut stored = self
            .slot(asset)
            .entry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        stored.quote = Some(Arc::new(quote));
    }

    pub fn quote(&self, asset: AssetId) -> Option<Arc<LiveQuote>> {
        self.slot(asset)
            .entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .quote
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn point(day: i64, close: f64) -> PricePoint {
        PricePoint {
            timestamp: t0() + chrono::Duration::days(day),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    fn cache() -> SeriesCache {
        SeriesCache::new(
            Duration::from_secs(900),
            RetentionPolicy {
                max_age: chrono::Duration::days(730),
                max_points: 1000,
                floor_points: 0,
            },
        )
    }

    #[test]
    fn starts_empty_and_stale() {
        let cache = cache();
        for asset in AssetId::ALL {
            let entry = cache.read(asset);
            assert!(entry.series.is_empty());
            assert_eq!(entry.state, FreshnessState::Stale);
            assert_eq!(entry.series.snapshot_id(), SnapshotId::INITIAL);
        }
    }

    #[test]
    fn merge_publishes_sorted_fresh_snapshot() {
        let cache = cache();
        let incoming: Vec<_> = (0..10).rev().map(|d| point(d, 100.0 + d as f64)).collect();
        let now = t0() + chrono::Duration::days(10);
        let id = cache.merge_at(AssetId::Eth, &incoming, now);
        assert_eq!(id, SnapshotId(1));

        let entry = cache.read_at(AssetId::Eth, now);
        assert_eq!(entry.state, FreshnessState::Fresh);
        assert_eq!(entry.series.len(), 10);
        assert!(entry
            .series
            .points()
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn incoming_wins_on_collision() {
        let cache = cache();
        let now = t0();
        cache.merge_at(AssetId::Btc, &[point(0, 10.0), point(1, 11.0)], now);
        cache.merge_at(AssetId::Btc, &[point(1, 99.0), point(2, 12.0)], now);
        let closes = cache.read_at(AssetId::Btc, now).series.closes();
        assert_eq!(closes, vec![10.0, 99.0, 12.0]);
    }

    #[test]
    fn failure_preserves_last_good_series() {
        let cache = cache();
        cache.merge_at(AssetId::Sol, &[point(0, 5.0)], t0());
        cache.mark_failed(AssetId::Sol, "provider unavailable");
        let entry = cache.read_at(AssetId::Sol, t0());
        assert_eq!(entry.series.len(), 1);
        assert!(matches!(entry.state, FreshnessState::Failed { .. }));
    }

    #[test]
    fn fresh_entry_ages_into_stale() {
        let cache = cache();
        cache.merge_at(AssetId::Xrp, &[point(0, 0.5)], t0());
        assert_eq!(
            cache.read_at(AssetId::Xrp, t0() + chrono::Duration::minutes(10)).state,
            FreshnessState::Fresh
        );
        assert_eq!(
            cache.read_at(AssetId::Xrp, t0() + chrono::Duration::minutes(16)).state,
            FreshnessState::Stale
        );
    }

    #[test]
    fn last_refreshed_never_moves_backwards() {
        let cache = cache();
        let later = t0() + chrono::Duration::hours(2);
        cache.merge_at(AssetId::Eth, &[point(0, 1.0)], later);
        cache.merge_at(AssetId::Eth, &[point(1, 1.0)], t0());
        assert_eq!(cache.read_at(AssetId::Eth, later).series.last_refreshed(), Some(later));
    }

    #[test]
    fn cancelled_refresh_restores_prior_state() {
        let cache = cache();
        cache.merge_at(AssetId::Btc, &[point(0, 1.0)], t0());
        cache.mark_refreshing(AssetId::Btc);
        assert_eq!(cache.read_at(AssetId::Btc, t0()).state, FreshnessState::Refreshing);
        cache.cancel_refresh(AssetId::Btc);
        assert_eq!(cache.read_at(AssetId::Btc, t0()).state, FreshnessState::Fresh);
    }

    #[test]
    fn invalid_points_are_refused() {
        let cache = cache();
        let mut bad = point(1, 10.0);
        bad.high = 1.0;
        cache.merge_at(AssetId::Eth, &[point(0, 10.0), bad], t0());
        assert_eq!(cache.read_at(AssetId::Eth, t0()).series.len(), 1);
    }

    #[test]
    fn quotes_are_stored_per_asset() {
        let cache = cache();
        cache.set_quote(LiveQuote {
            asset: AssetId::Sol,
            price: 150.0,
            change_24h_pct: None,
            market_cap: None,
            volume_24h: None,
            fetched_at: t0(),
        });
        assert_eq!(cache.quote(AssetId::Sol).unwrap().price, 150.0);
        assert!(cache.quote(AssetId::Eth).is_none());
    }

    #[test]
    fn freshness_state_serializes_tagged() {
        let json = serde_json::to_string(&FreshnessState::Failed {
            last_error: "boom".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"FAILED","last_error":"boom"}"#);
    }

    #[test]
    fn merge_survives_retention_beyond_calendar_range() {
        let config = crate::config::PipelineConfig {
            retention_days: 200_000_000,
            ..crate::config::PipelineConfig::default()
        };
        config.validate().unwrap();
        let cache = SeriesCache::new(Duration::from_secs(900), RetentionPolicy::from_config(&config));
        let points: Vec<_> = (0..5).map(|d| point(d, 50.0)).collect();
        assert_eq!(cache.merge(AssetId::Eth, &points), SnapshotId(1));
        assert_eq!(cache.read(AssetId::Eth).series.len(), 5);
    }
}
