//! Export: CSV and JSON renderings of series and forecast bundles.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use cryptocast_core::cache::CacheEntry;
use cryptocast_core::domain::{ForecastBundle, Series};
use serde::Serialize;

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: timestamp, open, high, low, close, volume
pub fn export_series_csv(series: &Series) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "open", "high", "low", "close", "volume"])?;
    for p in series.points() {
        wtr.write_record([
            &p.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            &p.open.to_string(),
            &p.high.to_string(),
            &p.low.to_string(),
            &p.close.to_string(),
            &p.volume.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: timestamp, value, confidence_low, confidence_high
pub fn export_forecast_csv(bundle: &ForecastBundle) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "value", "confidence_low", "confidence_high"])?;
    for p in &bundle.predicted_points {
        wtr.write_record([
            &p.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            &p.value.to_string(),
            &p.confidence_low.to_string(),
            &p.confidence_high.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── JSON export ────────────────────────────────────────────────────

#[derive(Serialize)]
struct SeriesDocument<'a> {
    state: &'a cryptocast_core::cache::FreshnessState,
    #[serde(flatten)]
    series: &'a Series,
}

/// A cache read as pretty JSON, freshness included.
pub fn export_series_json(entry: &CacheEntry) -> Result<String> {
    let doc = SeriesDocument {
        state: &entry.state,
        series: entry.series.as_ref(),
    };
    serde_json::to_string_pretty(&doc).context("failed to serialize series to JSON")
}

pub fn export_forecast_json(bundle: &ForecastBundle) -> Result<String> {
    serde_json::to_string_pretty(bundle).context("failed to serialize ForecastBundle to JSON")
}

/// Write `contents` to `path`, creating parent directories.
pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cryptocast_core::cache::{RetentionPolicy, SeriesCache};
    use cryptocast_core::domain::{AssetId, Horizon, PredictedPoint, PricePoint, SnapshotId};
    use std::time::Duration;

    fn cached_entry() -> CacheEntry {
        let cache = SeriesCache::new(
            Duration::from_secs(900),
            RetentionPolicy {
                max_age: chrono::Duration::days(730),
                max_points: 1000,
                floor_points: 0,
            },
        );
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let points: Vec<_> = (0..3)
            .map(|i| PricePoint {
                timestamp: t0 + chrono::Duration::days(i),
                open: 10.0,
                high: 12.0,
                low: 9.0,
                close: 11.0,
                volume: 5.0,
            })
            .collect();
        cache.merge_at(AssetId::Eth, &points, t0);
        cache.read_at(AssetId::Eth, t0)
    }

    #[test]
    fn series_csv_has_header_and_rows() {
        let csv = export_series_csv(&cached_entry().series).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "timestamp,open,high,low,close,volume");
        assert_eq!(lines[1], "2025-06-01T00:00:00Z,10,12,9,11,5");
    }

    #[test]
    fn forecast_csv_rows_match_points() {
        let t = Utc.with_ymd_and_hms(2025, 6, 4, 0, 0, 0).unwrap();
        let bundle = ForecastBundle {
            asset: AssetId::Btc,
            horizon: Horizon::clamped(1),
            predicted_points: vec![PredictedPoint {
                timestamp: t,
                value: 100.5,
                confidence_low: 90.0,
                confidence_high: 111.0,
            }],
            source_snapshot_id: SnapshotId(2),
            model_version: "1+00000000".into(),
            generated_at: t,
            source_refreshed_at: Some(t),
            stale_source: false,
        };
        let csv = export_forecast_csv(&bundle).unwrap();
        assert_eq!(csv.lines().nth(1), Some("2025-06-04T00:00:00Z,100.5,90,111"));

        let json: serde_json::Value = serde_json::from_str(&export_forecast_json(&bundle).unwrap()).unwrap();
        assert_eq!(json["model_version"], "1+00000000");
        assert_eq!(json["source_snapshot_id"], 2);
    }

    #[test]
    fn series_json_carries_state() {
        let json: serde_json::Value =
            serde_json::from_str(&export_series_json(&cached_entry()).unwrap()).unwrap();
        assert_eq!(json["asset"], "ETH");
        assert_eq!(json["state"]["state"], "FRESH");
        assert_eq!(json["points"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/btc.csv");
        write_file(&path, "a,b\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n");
    }
}
