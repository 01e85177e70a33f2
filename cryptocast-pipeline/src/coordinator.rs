//! Refresh coordinator: the only writer of the series cache.
//!
//! Per asset the coordinator runs `IDLE → REFRESHING → IDLE`. The
//! `IDLE → REFRESHING` transition happens under the asset's schedule mutex,
//! so at most one fetch per asset is ever in flight. A caller that asks for
//! a refresh while one is running waits on the asset's condvar and receives
//! the in-flight fetch's outcome instead of issuing its own request.
//!
//! Scheduling after each attempt:
//! - success: next attempt one refresh interval later, failure count reset
//! - `RateLimited`: nothing before `retry_after`, cache state untouched
//! - other failures: plain interval until `failures_before_backoff`
//!   consecutive failures, then exponential backoff capped at `max_backoff`
//!
//! A panic inside an attempt counts as a failed attempt.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cryptocast_core::cache::SeriesCache;
use cryptocast_core::config::PipelineConfig;
use cryptocast_core::data::{MarketDataProvider, ProviderError};
use cryptocast_core::domain::{AssetId, SnapshotId};
use tracing::{debug, error, info, warn};

/// Result of one refresh attempt, shared by every coalesced caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fetched points were merged and published.
    Merged {
        snapshot_id: SnapshotId,
        points: usize,
        dropped: usize,
    },
    /// Upstream asked us to wait; nothing was merged.
    RateLimited { retry_after: Duration },
    /// The fetch failed; the entry is `FAILED` with its last good series.
    Failed { error: ProviderError },
    /// A rate-limit or backoff hold is active; no request was sent.
    Deferred { until: Instant },
    /// Shutdown began before the fetch finished; the response was discarded.
    Cancelled,
}

impl RefreshOutcome {
    pub fn snapshot_id(&self) -> Option<SnapshotId> {
        match self {
            RefreshOutcome::Merged { snapshot_id, .. } => Some(*snapshot_id),
            _ => None,
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, RefreshOutcome::Merged { .. })
    }
}

/// Timing knobs, split out of [`PipelineConfig`] so tests can use
/// millisecond intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub interval: Duration,
    pub max_backoff: Duration,
    pub failures_before_backoff: u32,
}

impl RefreshPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            interval: config.refresh_interval(),
            max_backoff: config.max_backoff(),
            failures_before_backoff: config.failures_before_backoff,
        }
    }

    /// Delay before the next attempt after `consecutive_failures` failures.
    pub fn delay_after_failures(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures < self.failures_before_backoff.max(1) {
            return self.interval;
        }
        let exponent = consecutive_failures + 1 - self.failures_before_backoff.max(1);
        let factor = 2u32.checked_pow(exponent.min(31)).unwrap_or(u32::MAX);
        self.interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    fn is_backing_off(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.failures_before_backoff.max(1)
    }
}

/// Point-in-time view of one asset's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSnapshot {
    pub in_flight: bool,
    /// Callers currently waiting on the in-flight fetch.
    pub coalesced_waiters: usize,
    pub consecutive_failures: u32,
    pub next_due: Instant,
    /// Set while a rate-limit or backoff hold blocks on-demand refreshes.
    pub hold_until: Option<Instant>,
    pub completed_refreshes: u64,
    pub last_outcome: Option<RefreshOutcome>,
}

#[derive(Debug)]
struct Schedule {
    in_flight: bool,
    waiters: usize,
    /// Bumped every time an attempt completes.
    generation: u64,
    last_outcome: Option<RefreshOutcome>,
    consecutive_failures: u32,
    next_due: Instant,
    hold_until: Option<Instant>,
}

#[derive(Debug)]
struct AssetLane {
    schedule: Mutex<Schedule>,
    completed: Condvar,
}

impl AssetLane {
    fn new(now: Instant) -> Self {
        Self {
            schedule: Mutex::new(Schedule {
                in_flight: false,
                waiters: 0,
                generation: 0,
                last_outcome: None,
                consecutive_failures: 0,
                next_due: now,
                hold_until: None,
            }),
            completed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives provider fetches into the cache.
pub struct RefreshCoordinator {
    provider: Arc<dyn MarketDataProvider>,
    cache: Arc<SeriesCache>,
    policy: RefreshPolicy,
    lanes: [AssetLane; AssetId::COUNT],
    shutdown: AtomicBool,
}

impl RefreshCoordinator {
    /// Every asset starts due immediately.
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        cache: Arc<SeriesCache>,
        policy: RefreshPolicy,
    ) -> Self {
        let now = Instant::now();
        Self {
            provider,
            cache,
            policy,
            lanes: AssetId::ALL.map(|_| AssetLane::new(now)),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn lane(&self, asset: AssetId) -> &AssetLane {
        &self.lanes[asset.index()]
    }

    /// Refresh `asset` now, or join the refresh already in flight.
    ///
    /// Blocks until the attempt completes. Returns `Deferred` without any
    /// upstream request while a rate-limit or backoff hold is active.
    pub fn refresh(&self, asset: AssetId) -> RefreshOutcome {
        if self.is_shut_down() {
            return RefreshOutcome::Cancelled;
        }
        let lane = self.lane(asset);
        let mut schedule = lane.lock();

        if schedule.in_flight {
            let joined = schedule.generation;
            schedule.waiters += 1;
            debug!(asset = %asset, waiters = schedule.waiters, "joining in-flight refresh");
            while schedule.in_flight && schedule.generation == joined {
                schedule = lane
                    .completed
                    .wait(schedule)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            schedule.waiters -= 1;
            return schedule
                .last_outcome
                .clone()
                .unwrap_or(RefreshOutcome::Cancelled);
        }

        if let Some(until) = schedule.hold_until {
            if until > Instant::now() {
                debug!(
                    asset = %asset,
                    remaining_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "refresh deferred by hold"
                );
                return RefreshOutcome::Deferred { until };
            }
        }

        schedule.in_flight = true;
        drop(schedule);

        // A panicking provider must still release the lane and its waiters.
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.attempt(asset))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(asset = %asset, "refresh attempt panicked");
                self.cache.mark_failed(asset, "refresh panicked");
                RefreshOutcome::Failed {
                    error: ProviderError::Unavailable("refresh panicked".into()),
                }
            }
        };

        let mut schedule = lane.lock();
        self.apply(asset, &mut schedule, &outcome, Instant::now());
        schedule.in_flight = false;
        schedule.generation += 1;
        schedule.last_outcome = Some(outcome.clone());
        drop(schedule);
        lane.completed.notify_all();

        outcome
    }

    /// One fetch-and-merge, outside every coordinator lock.
    fn attempt(&self, asset: AssetId) -> RefreshOutcome {
        self.cache.mark_refreshing(asset);
        // Re-fetch from the newest cached bar so a still-forming daily bar
        // gets its final values.
        let since = self.cache.read(asset).series.last().map(|p| p.timestamp);
        let result = self.provider.fetch_series(asset, since);

        if self.is_shut_down() {
            self.cache.cancel_refresh(asset);
            info!(asset = %asset, "shutdown during refresh, response discarded");
            return RefreshOutcome::Cancelled;
        }

        match result {
            Ok(fetched) => {
                let snapshot_id = self.cache.merge(asset, &fetched.points);
                info!(
                    asset = %asset,
                    snapshot_id = snapshot_id.0,
                    points = fetched.points.len(),
                    dropped = fetched.dropped,
                    provider = self.provider.name(),
                    "refresh merged"
                );
                self.refresh_quote(asset);
                RefreshOutcome::Merged {
                    snapshot_id,
                    points: fetched.points.len(),
                    dropped: fetched.dropped,
                }
            }
            Err(ProviderError::RateLimited { retry_after }) => {
                self.cache.cancel_refresh(asset);
                RefreshOutcome::RateLimited { retry_after }
            }
            Err(error) => {
                self.cache.mark_failed(asset, error.to_string());
                RefreshOutcome::Failed { error }
            }
        }
    }

    /// Quote failures never fail the series refresh.
    fn refresh_quote(&self, asset: AssetId) {
        match self.provider.fetch_quote(asset) {
            Ok(quote) => self.cache.set_quote(quote),
            Err(e) => debug!(asset = %asset, error = %e, "quote refresh skipped"),
        }
    }

    fn apply(&self, asset: AssetId, schedule: &mut Schedule, outcome: &RefreshOutcome, now: Instant) {
        match outcome {
            RefreshOutcome::Merged { .. } => {
                schedule.consecutive_failures = 0;
                schedule.hold_until = None;
                schedule.next_due = now + self.policy.interval;
            }
            RefreshOutcome::RateLimited { retry_after } => {
                let until = now + *retry_after;
                schedule.hold_until = Some(until);
                schedule.next_due = until;
                warn!(asset = %asset, retry_after_secs = retry_after.as_secs(), "rate limited, next attempt held");
            }
            RefreshOutcome::Failed { error } => {
                schedule.consecutive_failures += 1;
                let delay = self.policy.delay_after_failures(schedule.consecutive_failures);
                schedule.next_due = now + delay;
                if self.policy.is_backing_off(schedule.consecutive_failures) {
                    schedule.hold_until = Some(schedule.next_due);
                    warn!(
                        asset = %asset,
                        failures = schedule.consecutive_failures,
                        backoff_secs = delay.as_secs(),
                        %error,
                        "refresh backing off"
                    );
                } else {
                    warn!(asset = %asset, failures = schedule.consecutive_failures, %error, "refresh failed");
                }
            }
            RefreshOutcome::Deferred { .. } | RefreshOutcome::Cancelled => {}
        }
    }

    /// Assets whose next attempt is due at `now` and that are not in flight.
    pub fn due(&self, now: Instant) -> Vec<AssetId> {
        AssetId::ALL
            .into_iter()
            .filter(|&asset| {
                let schedule = self.lane(asset).lock();
                !schedule.in_flight && schedule.next_due <= now
            })
            .collect()
    }

    /// Time until the earliest scheduled attempt, zero if one is overdue.
    /// Lanes with a fetch in flight are not waiting on the schedule and are
    /// left out.
    pub fn until_next_due(&self, now: Instant) -> Duration {
        AssetId::ALL
            .into_iter()
            .filter_map(|asset| {
                let schedule = self.lane(asset).lock();
                (!schedule.in_flight).then(|| schedule.next_due.saturating_duration_since(now))
            })
            .min()
            .unwrap_or(self.policy.interval)
    }

    /// Run every attempt due at `now`, one asset at a time.
    pub fn run_due(&self, now: Instant) -> Vec<(AssetId, RefreshOutcome)> {
        self.due(now)
            .into_iter()
            .map(|asset| (asset, self.refresh(asset)))
            .collect()
    }

    pub fn schedule(&self, asset: AssetId) -> ScheduleSnapshot {
        let s = self.lane(asset).lock();
        ScheduleSnapshot {
            in_flight: s.in_flight,
            coalesced_waiters: s.waiters,
            consecutive_failures: s.consecutive_failures,
            next_due: s.next_due,
            hold_until: s.hold_until,
            completed_refreshes: s.generation,
            last_outcome: s.last_outcome.clone(),
        }
    }

    /// Stop accepting refreshes. A fetch still in flight finishes its
    /// request but its response is discarded, not merged.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            info!("refresh coordinator shutting down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
