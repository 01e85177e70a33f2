//! Series: an immutable, published view of one asset's price history.

use super::asset::AssetId;
use super::point::PricePoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing identifier of a published series snapshot.
///
/// `SnapshotId(0)` is the empty series every asset starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

impl SnapshotId {
    pub const INITIAL: SnapshotId = SnapshotId(0);

    pub fn next(self) -> SnapshotId {
        SnapshotId(self.0 + 1)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordered price history for one asset.
///
/// Timestamps are strictly increasing. A `Series` is never mutated after it
/// is published by the cache; readers hold it behind an `Arc`. Decoding
/// rejects documents that break ordering or carry invalid points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesDocument")]
pub struct Series {
    asset: AssetId,
    points: Vec<PricePoint>,
    last_refreshed: Option<DateTime<Utc>>,
    snapshot_id: SnapshotId,
}

#[derive(Deserialize)]
struct SeriesDocument {
    asset: AssetId,
    points: Vec<PricePoint>,
    last_refreshed: Option<DateTime<Utc>>,
    snapshot_id: SnapshotId,
}

impl TryFrom<SeriesDocument> for Series {
    type Error = String;

    fn try_from(doc: SeriesDocument) -> Result<Self, Self::Error> {
        if let Some(w) = doc.points.windows(2).find(|w| w[0].timestamp >= w[1].timestamp) {
            return Err(format!(
                "points not strictly increasing at {} -> {}",
                w[0].timestamp, w[1].timestamp
            ));
        }
        if let Some((point, e)) = doc
            .points
            .iter()
            .find_map(|p| p.validate().err().map(|e| (p, e)))
        {
            return Err(format!("invalid point at {}: {e}", point.timestamp));
        }
        Ok(Self {
            asset: doc.asset,
            points: doc.points,
            last_refreshed: doc.last_refreshed,
            snapshot_id: doc.snapshot_id,
        })
    }
}

impl Series {
    /// The empty series an asset holds before its first refresh.
    pub fn empty(asset: AssetId) -> Self {
        Self {
            asset,
            points: Vec::new(),
            last_refreshed: None,
            snapshot_id: SnapshotId::INITIAL,
        }
    }

    /// Build a series from points already sorted with strictly increasing
    /// timestamps. Used by the cache when publishing a merge.
    pub(crate) fn from_sorted(
        asset: AssetId,
        points: Vec<PricePoint>,
        last_refreshed: DateTime<Utc>,
        snapshot_id: SnapshotId,
    ) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        Self {
            asset,
            points,
            last_refreshed: Some(last_refreshed),
            snapshot_id,
        }
    }

    pub fn asset(&self) -> AssetId {
        self.asset
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// Close prices in timestamp order.
    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    /// Age of the data relative to `now`; `None` if never refreshed.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_refreshed.map(|t| now - t)
    }
}
