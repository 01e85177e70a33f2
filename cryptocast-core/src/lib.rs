//! Cryptocast Core: domain types, market data providers, series cache, models.
//!
//! This crate holds everything that does not need a thread of its own:
//! - Domain types (assets, price points, series snapshots, forecasts)
//! - Market data providers (CoinGecko over HTTP, deterministic synthetic)
//! - Request pacing and a circuit breaker for the upstream API
//! - The per-asset series cache with freshness tracking and retention
//! - Model artifacts and the per-asset model registry
//! - Pipeline configuration

pub mod cache;
pub mod config;
pub mod data;
pub mod domain;
pub mod model;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared with refresh workers and
    /// forecast callers is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Series>();
        require_sync::<domain::Series>();
        require_send::<domain::ForecastBundle>();
        require_sync::<domain::ForecastBundle>();
        require_send::<domain::LiveQuote>();
        require_sync::<domain::LiveQuote>();

        require_send::<cache::SeriesCache>();
        require_sync::<cache::SeriesCache>();
        require_send::<cache::CacheEntry>();
        require_sync::<cache::CacheEntry>();

        require_send::<data::CoinGeckoProvider>();
        require_sync::<data::CoinGeckoProvider>();
        require_send::<data::SyntheticProvider>();
        require_sync::<data::SyntheticProvider>();
        require_send::<data::RequestBudget>();
        require_sync::<data::RequestBudget>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();

        require_send::<model::ModelRegistry>();
        require_sync::<model::ModelRegistry>();
        require_send::<model::ModelHandle>();
        require_sync::<model::ModelHandle>();
    }

    /// Providers are used behind `Arc<dyn MarketDataProvider>`.
    #[test]
    fn provider_trait_is_object_safe() {
        fn _takes(_: &dyn data::MarketDataProvider) {}
        let synthetic = data::SyntheticProvider::new(7);
        _takes(&synthetic);
    }
}
