//! CoinGecko market data provider.
//!
//! Daily bars are assembled from `/coins/{id}/market_chart` with
//! `interval=daily`: upstream reports one price and one rolling 24h volume
//! per UTC midnight, plus a final sample at the current time. A bar for day
//! D opens at the D midnight sample and closes at the D+1 midnight sample,
//! so only completed days are ever emitted. Spot quotes come from
//! `/simple/price`.
//!
//! Every request is paced through the shared [`RequestBudget`] and gated by
//! the [`CircuitBreaker`]. Retries are the caller's job: a 429 surfaces as
//! `RateLimited` with the server's Retry-After so the refresh scheduler can
//! wait exactly that long.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{FetchedSeries, MarketDataProvider, ProviderError};
use super::rate_limit::RequestBudget;
use super::validate::{parse_samples, validate_points, Sample};
use crate::config::PipelineConfig;
use crate::domain::{AssetId, LiveQuote, PricePoint};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry-After assumed when a 429 carries no usable header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// A day whose first sample is later than this past midnight did not start
/// inside the response window.
const DAY_START_TOLERANCE_SECS: u32 = 3600;

pub struct CoinGeckoProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    vs_currency: String,
    initial_history_days: u32,
    budget: Arc<RequestBudget>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl CoinGeckoProvider {
    pub fn new(
        config: &PipelineConfig,
        budget: Arc<RequestBudget>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("cryptocast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(config, client, budget, circuit_breaker))
    }

    pub(crate) fn with_client(
        config: &PipelineConfig,
        client: reqwest::blocking::Client,
        budget: Arc<RequestBudget>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            client,
            base_url: config.provider_base_url.trim_end_matches('/').to_string(),
            vs_currency: config.vs_currency.clone(),
            initial_history_days: config.initial_history_days,
            budget,
            circuit_breaker,
        }
    }

    /// Provider with its own budget and breaker derived from `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ProviderError> {
        Self::new(
            config,
            Arc::new(RequestBudget::per_minute(config.requests_per_minute)),
            Arc::new(CircuitBreaker::new(config.breaker_cooldown())),
        )
    }

    fn chart_url(&self, asset: AssetId, days: u32) -> String {
        format!(
            "{}/coins/{}/market_chart?vs_currency={}&days={days}&interval=daily",
            self.base_url,
            asset.provider_id(),
            self.vs_currency
        )
    }

    fn quote_url(&self, asset: AssetId) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies={}\
             &include_market_cap=true&include_24hr_vol=true&include_24hr_change=true",
            self.base_url,
            asset.provider_id(),
            self.vs_currency
        )
    }

    /// Paced, breaker-gated GET returning decoded JSON.
    fn get_json(&self, url: &str) -> Result<Value, ProviderError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(ProviderError::Unavailable(format!(
                "provider blocked, circuit breaker open for another {}s",
                self.circuit_breaker.remaining_cooldown().as_secs()
            )));
        }

        self.budget.acquire();
        debug!(%url, "provider request");

        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                ProviderError::Unavailable(format!("request timed out: {e}"))
            } else {
                ProviderError::Unavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(ProviderError::Unavailable("provider refused request (HTTP 403)".into()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(
                resp.headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            self.budget.hold_for(retry_after);
            warn!(retry_after_secs = retry_after.as_secs(), "provider rate limit hit");
            return Err(ProviderError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!("HTTP {status}")));
        }

        resp.json::<Value>().map_err(|e| {
            if e.is_timeout() {
                ProviderError::Unavailable(format!("response body timed out: {e}"))
            } else {
                ProviderError::MalformedResponse(format!("undecodable JSON: {e}"))
            }
        })
    }
}

impl MarketDataProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        "coingecko"
    }

    fn fetch_series(
        &self,
        asset: AssetId,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchedSeries, ProviderError> {
        let now = Utc::now();
        let days = lookback_days(since, now, self.initial_history_days);
        let body = self.get_json(&self.chart_url(asset, days))?;

        let (prices, bad_prices) = parse_samples(asset, "prices", &body)?;
        let (volumes, bad_volumes) = parse_samples(asset, "total_volumes", &body)?;
        let mut fetched = validate_points(asset, daily_bars(&prices, &volumes), now)?;
        fetched.dropped += bad_prices + bad_volumes;
        debug!(asset = %asset, days, bars = fetched.points.len(), "chart assembled");
        Ok(fetched)
    }

    fn fetch_quote(&self, asset: AssetId) -> Result<LiveQuote, ProviderError> {
        let body = self.get_json(&self.quote_url(asset))?;
        parse_quote(asset, &self.vs_currency, &body, Utc::now())
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn starts_day(sample: &Sample) -> bool {
    sample.timestamp.num_seconds_from_midnight() <= DAY_START_TOLERANCE_SECS
}

/// One bar per completed UTC day, stamped at midnight.
///
/// Day D is emitted only when its first sample opens the day and day D+1
/// also has an opening sample, which becomes D's close. A window that starts
/// mid-day therefore never yields a truncated bar for that day, and the
/// still-forming current day is left out. High and low cover every sample
/// in the day plus the close. Both inputs must be sorted.
fn daily_bars(prices: &[Sample], volumes: &[Sample]) -> Vec<PricePoint> {
    // (day, first index, end index) over the sorted prices
    let mut days: Vec<(NaiveDate, usize, usize)> = Vec::new();
    for (i, sample) in prices.iter().enumerate() {
        let date = sample.timestamp.date_naive();
        match days.last_mut() {
            Some((day, _, end)) if *day == date => *end = i + 1,
            _ => days.push((date, i, i + 1)),
        }
    }

    let mut bars = Vec::with_capacity(days.len());
    for pair in days.windows(2) {
        let (date, start, end) = pair[0];
        let (next_date, next_start, _) = pair[1];
        let opening = &prices[start];
        let closing = &prices[next_start];
        if date.succ_opt() != Some(next_date) || !starts_day(opening) || !starts_day(closing) {
            debug!(%date, "skipping partial day");
            continue;
        }

        let (high, low) = prices[start..end]
            .iter()
            .map(|s| s.value)
            .chain(std::iter::once(closing.value))
            .fold((f64::MIN, f64::MAX), |(h, l), v| (h.max(v), l.min(v)));
        bars.push(PricePoint {
            timestamp: midnight(date),
            open: opening.value,
            high,
            low,
            close: closing.value,
            volume: volume_between(volumes, opening.timestamp, closing.timestamp),
        });
    }
    bars
}

/// The latest rolling 24h volume reported in `(from, to]`, zero when none.
fn volume_between(volumes: &[Sample], from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let upto = volumes.partition_point(|v| v.timestamp <= to);
    volumes[..upto]
        .last()
        .filter(|v| v.timestamp > from)
        .map_or(0.0, |v| v.value)
}

/// Seconds from a Retry-After header; HTTP-date forms fall back to the default.
fn parse_retry_after(header: Option<&str>) -> Duration {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// The `days` query value whose window includes the midnight sample of the
/// day containing `since`, so that day's bar is rebuilt in full.
fn lookback_days(since: Option<DateTime<Utc>>, now: DateTime<Utc>, initial_days: u32) -> u32 {
    match since {
        Some(since) => {
            let start = midnight(since.date_naive());
            // Whole days since `start`, rounded up, plus one day of margin.
            let days = (now - start).num_days().max(0) + 2;
            u32::try_from(days).unwrap_or(u32::MAX)
        }
        None => initial_days,
    }
}

fn parse_quote(
    asset: AssetId,
    vs_currency: &str,
    body: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<LiveQuote, ProviderError> {
    let entry = body.get(asset.provider_id()).ok_or_else(|| {
        ProviderError::MalformedResponse(format!("quote response has no entry for {asset}"))
    })?;
    let field = |suffix: &str| entry.get(format!("{vs_currency}{suffix}")).and_then(Value::as_f64);

    let price = field("")
        .filter(|p| p.is_finite() && *p >= 0.0)
        .ok_or_else(|| ProviderError::MalformedResponse(format!("quote for {asset} has no price")))?;

    Ok(LiveQuote {
        asset,
        price,
        change_24h_pct: field("_24h_change"),
        market_cap: field("_market_cap"),
        volume_24h: field("_24h_vol"),
        fetched_at,
    })
}
