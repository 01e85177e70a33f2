//! In-memory series cache with freshness tracking and bounded retention

pub mod retention;
pub mod series_cache;

pub use retention::RetentionPolicy;
pub use series_cache::{CacheEntry, FreshnessState, SeriesCache};
