//! Response validation: raw upstream samples → validated points.
//!
//! Upstream time series arrive as `[timestamp_ms, value]` pairs. Bad samples
//! and bars are dropped and logged; only a response with no usable data at
//! all is an error.

use super::provider::{FetchedSeries, ProviderError};
use crate::domain::{AssetId, PricePoint};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

/// One `[timestamp_ms, value]` pair from a chart response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

fn parse_sample(raw: &Value) -> Result<Sample, String> {
    let fields = raw
        .as_array()
        .ok_or_else(|| format!("expected array, got {raw}"))?;
    if fields.len() < 2 {
        return Err(format!("expected 2 fields, got {}", fields.len()));
    }

    let ts_ms = fields[0]
        .as_i64()
        .or_else(|| fields[0].as_f64().map(|f| f as i64))
        .ok_or_else(|| format!("timestamp is not a number: {}", fields[0]))?;
    let timestamp = DateTime::from_timestamp_millis(ts_ms)
        .ok_or_else(|| format!("timestamp out of range: {ts_ms}"))?;

    let value = fields[1]
        .as_f64()
        .ok_or_else(|| format!("value is not a number: {}", fields[1]))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("value out of range: {value}"));
    }
    Ok(Sample { timestamp, value })
}

/// Parse the sample array stored under `field` of a chart response.
///
/// Returns the samples sorted by timestamp (a repeated timestamp keeps the
/// later sample) and the number of samples dropped. A missing or non-array
/// field is malformed.
pub fn parse_samples(
    asset: AssetId,
    field: &str,
    body: &Value,
) -> Result<(Vec<Sample>, usize), ProviderError> {
    let raw = body.get(field).and_then(Value::as_array).ok_or_else(|| {
        ProviderError::MalformedResponse(format!("{asset} chart response has no `{field}` array"))
    })?;

    let mut samples = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;
    for (i, entry) in raw.iter().enumerate() {
        match parse_sample(entry) {
            Ok(sample) => samples.push(sample),
            Err(reason) => {
                dropped += 1;
                warn!(asset = %asset, field, index = i, %reason, "dropping invalid sample");
            }
        }
    }

    // Stable sort keeps upstream order among equal timestamps.
    samples.sort_by_key(|s| s.timestamp);
    let before = samples.len();
    let mut deduped: Vec<Sample> = Vec::with_capacity(before);
    for sample in samples {
        match deduped.last_mut() {
            Some(last) if last.timestamp == sample.timestamp => *last = sample,
            _ => deduped.push(sample),
        }
    }
    dropped += before - deduped.len();
    Ok((deduped, dropped))
}

/// Validate assembled bars into a [`FetchedSeries`].
///
/// Invalid bars are dropped with a warning. Output is sorted by timestamp;
/// when bars repeat a timestamp the later one wins and the earlier one
/// counts as dropped. No surviving bar at all is `MalformedResponse`.
pub fn validate_points(
    asset: AssetId,
    points: Vec<PricePoint>,
    fetched_at: DateTime<Utc>,
) -> Result<FetchedSeries, ProviderError> {
    let received = points.len();
    let mut dropped = 0usize;
    let mut valid: Vec<PricePoint> = Vec::with_capacity(received);
    for point in points {
        match point.validate() {
            Ok(()) => valid.push(point),
            Err(reason) => {
                dropped += 1;
                warn!(asset = %asset, timestamp = %point.timestamp, %reason, "dropping invalid price point");
            }
        }
    }

    valid.sort_by_key(|p| p.timestamp);
    let before = valid.len();
    let mut deduped: Vec<PricePoint> = Vec::with_capacity(before);
    for point in valid {
        match deduped.last_mut() {
            Some(last) if last.timestamp == point.timestamp => *last = point,
            _ => deduped.push(point),
        }
    }
    let duplicates = before - deduped.len();
    if duplicates > 0 {
        warn!(asset = %asset, duplicates, "response repeated timestamps; kept the latest bar");
        dropped += duplicates;
    }

    if deduped.is_empty() {
        return Err(ProviderError::MalformedResponse(format!(
            "no valid bars for {asset} ({received} assembled)"
        )));
    }

    Ok(FetchedSeries {
        asset,
        points: deduped,
        dropped,
        fetched_at,
    })
}
