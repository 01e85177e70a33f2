//! Cryptocast Pipeline: refresh coordination, forecast serving, read facade.
//!
//! This crate builds on `cryptocast-core` to provide:
//! - The refresh coordinator (single writer of the series cache)
//! - A background refresh worker with timer and on-demand triggers
//! - The forecast service with per-snapshot memoisation
//! - `MarketPipeline`, the facade consumed by presentation layers
//! - CSV and JSON export

pub mod coordinator;
pub mod export;
pub mod forecast;
pub mod pipeline;
pub mod worker;

pub use coordinator::{RefreshCoordinator, RefreshOutcome, RefreshPolicy, ScheduleSnapshot};
pub use export::{
    export_forecast_csv, export_forecast_json, export_series_csv, export_series_json, write_file,
};
pub use forecast::{ForecastError, ForecastMemo, ForecastService};
pub use pipeline::{AssetStatus, MarketPipeline};
pub use worker::{RefreshHandle, RefreshMode, RefreshTrigger, RefreshWorker};
