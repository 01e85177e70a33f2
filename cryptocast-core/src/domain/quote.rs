//! Live market quote for an asset.

use super::asset::AssetId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Spot market snapshot: price, 24h change, market cap, 24h volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveQuote {
    pub asset: AssetId,
    pub price: f64,
    pub change_24h_pct: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}
