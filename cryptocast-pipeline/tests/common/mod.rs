//! Scripted provider and fixtures shared by the pipeline integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use cryptocast_core::data::{FetchedSeries, MarketDataProvider, ProviderError};
use cryptocast_core::domain::{AssetId, LiveQuote, PricePoint};
use cryptocast_core::model::{ModelArtifact, ModelKind};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// `n` valid daily bars starting at `t0()` with a gentle uptrend.
pub fn daily_points(n: usize) -> Vec<PricePoint> {
    (0..n)
        .map(|i| {
            let close = 100.0 * (1.0 + 0.01 * (i as f64 * 0.7).sin()) * 1.002_f64.powi(i as i32);
            PricePoint {
                timestamp: t0() + chrono::Duration::days(i as i64),
                open: close * 0.995,
                high: close * 1.01,
                low: close * 0.985,
                close,
                volume: 1_000.0 + i as f64,
            }
        })
        .collect()
}

/// Blocks `fetch_series` until released, so tests can hold a fetch in flight.
#[derive(Default)]
pub struct Gate {
    released: Mutex<bool>,
    cv: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    pub fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut released = self.released.lock().unwrap();
        while !*released {
            released = self.cv.wait(released).unwrap();
        }
    }

    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.cv.notify_all();
    }

    pub fn wait_entered(&self, n: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.entered.load(Ordering::SeqCst) >= n)
    }
}

/// Provider that replays scripted responses, then repeats `fallback`.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Vec<PricePoint>, ProviderError>>>,
    fallback: Result<Vec<PricePoint>, ProviderError>,
    gate: Option<Gate>,
    calls: [AtomicUsize; AssetId::COUNT],
    in_flight: [AtomicUsize; AssetId::COUNT],
    overlap_seen: AtomicBool,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new(fallback: Result<Vec<PricePoint>, ProviderError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            gate: None,
            calls: Default::default(),
            in_flight: Default::default(),
            overlap_seen: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    pub fn returning(points: Vec<PricePoint>) -> Self {
        Self::new(Ok(points))
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Gate::default());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then(self, response: Result<Vec<PricePoint>, ProviderError>) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn push(&self, response: Result<Vec<PricePoint>, ProviderError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn gate(&self) -> &Gate {
        self.gate.as_ref().expect("provider is not gated")
    }

    pub fn calls(&self, asset: AssetId) -> usize {
        self.calls[asset.index()].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        AssetId::ALL.iter().map(|&a| self.calls(a)).sum()
    }

    /// Whether two fetches for the same asset ever overlapped.
    pub fn overlap_seen(&self) -> bool {
        self.overlap_seen.load(Ordering::SeqCst)
    }
}

impl MarketDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_series(
        &self,
        asset: AssetId,
        _since: Option<DateTime<Utc>>,
    ) -> Result<FetchedSeries, ProviderError> {
        self.calls[asset.index()].fetch_add(1, Ordering::SeqCst);
        if self.in_flight[asset.index()].fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap_seen.store(true, Ordering::SeqCst);
        }
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let response = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.in_flight[asset.index()].fetch_sub(1, Ordering::SeqCst);

        response.map(|points| FetchedSeries {
            asset,
            points,
            dropped: 0,
            fetched_at: Utc::now(),
        })
    }

    fn fetch_quote(&self, asset: AssetId) -> Result<LiveQuote, ProviderError> {
        Ok(LiveQuote {
            asset,
            price: 123.0,
            change_24h_pct: Some(1.5),
            market_cap: None,
            volume_24h: None,
            fetched_at: Utc::now(),
        })
    }
}

pub fn drift_artifact(asset: AssetId, min_history: usize, max_horizon_days: u32) -> ModelArtifact {
    ModelArtifact {
        asset,
        version: "1.0.0".into(),
        min_history,
        history_per_horizon_day: 0,
        min_horizon_days: 1,
        max_horizon_days,
        confidence_z: 1.96,
        kind: ModelKind::Drift { window: 5 },
    }
}

pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
