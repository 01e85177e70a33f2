//! Market data client: providers, pacing, and response validation

pub mod circuit_breaker;
pub mod coingecko;
pub mod provider;
pub mod rate_limit;
pub mod synthetic;
pub mod validate;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use coingecko::CoinGeckoProvider;
pub use provider::{FetchedSeries, MarketDataProvider, ProviderError};
pub use rate_limit::RequestBudget;
pub use synthetic::SyntheticProvider;
pub use validate::{parse_samples, validate_points, Sample};
