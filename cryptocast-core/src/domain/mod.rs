//! Domain types for the market data and forecast pipeline

pub mod asset;
pub mod forecast;
pub mod point;
pub mod quote;
pub mod series;

pub use asset::{AssetId, UnknownAsset};
pub use forecast::{ForecastBundle, Horizon, PredictedPoint};
pub use point::{PointError, PricePoint};
pub use quote::LiveQuote;
pub use series::{Series, SnapshotId};
