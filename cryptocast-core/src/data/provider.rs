//! Data provider trait and structured error types.
//!
//! The `MarketDataProvider` trait abstracts over data sources (CoinGecko,
//! the seeded synthetic generator) so the refresh path can be exercised
//! against scripted fakes in tests. Providers know nothing about the cache.

use crate::domain::{AssetId, LiveQuote, PricePoint};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Failures of a single upstream call. All three are retriable; they differ
/// in how the caller schedules the retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("rate limited by provider (retry after {}s)", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Validated result of a series fetch.
///
/// `points` is sorted with strictly increasing timestamps and every point
/// passes [`PricePoint::validate`]. It is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSeries {
    pub asset: AssetId,
    pub points: Vec<PricePoint>,
    /// Records dropped during validation.
    pub dropped: usize,
    pub fetched_at: DateTime<Utc>,
}

/// Source of market data for the tracked assets.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch OHLCV points for `asset` at or after `since` (full initial
    /// look-back when `None`).
    fn fetch_series(
        &self,
        asset: AssetId,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchedSeries, ProviderError>;

    /// Fetch the current spot quote for `asset`.
    fn fetch_quote(&self, asset: AssetId) -> Result<LiveQuote, ProviderError>;
}
