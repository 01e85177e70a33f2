//! Process-wide request pacing.
//!
//! The upstream quota is global, so one `RequestBudget` is shared by every
//! asset's fetches. Each request reserves the next free slot; slots are
//! spaced at least `min_interval` apart.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct RequestBudget {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestBudget {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Budget for a provider documented as allowing `requests_per_minute`.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(Duration::from_secs(60) / requests_per_minute.max(1))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Reserve the next slot and return how long the caller must wait for it.
    pub fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = next.map_or(now, |n| n.max(now));
        *next = Some(slot + self.min_interval);
        slot.saturating_duration_since(now)
    }

    /// Block the calling thread until its reserved slot arrives.
    pub fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "pacing upstream request");
            std::thread::sleep(wait);
        }
    }

    /// Push every future slot to at least `delay` from now (after the
    /// provider reports a rate limit).
    pub fn hold_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        *next = Some(next.map_or(until, |n| n.max(until)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_is_immediate() {
        let budget = RequestBudget::new(Duration::from_secs(10));
        assert_eq!(budget.reserve(), Duration::ZERO);
    }

    #[test]
    fn consecutive_reservations_are_spaced() {
        let budget = RequestBudget::new(Duration::from_secs(10));
        budget.reserve();
        let second = budget.reserve();
        let third = budget.reserve();
        assert!(second > Duration::from_secs(9) && second <= Duration::from_secs(10));
        assert!(third > Duration::from_secs(19) && third <= Duration::from_secs(20));
    }

    #[test]
    fn per_minute_converts_to_interval() {
        assert_eq!(RequestBudget::per_minute(30).min_interval(), Duration::from_secs(2));
        assert_eq!(RequestBudget::per_minute(0).min_interval(), Duration::from_secs(60));
    }

    #[test]
    fn hold_defers_next_slot() {
        let budget = RequestBudget::new(Duration::from_millis(1));
        budget.hold_for(Duration::from_secs(60));
        let wait = budget.reserve();
        assert!(wait > Duration::from_secs(59));
    }

    #[test]
    fn acquire_waits_out_short_interval() {
        let budget = RequestBudget::new(Duration::from_millis(20));
        let start = Instant::now();
        budget.acquire();
        budget.acquire();
        assert!(start.elapsed() >= Duration::from_millis(19));
    }
}
