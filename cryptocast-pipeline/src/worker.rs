//! Background refresh thread.
//!
//! Communication with callers is via an `mpsc` channel. The thread sleeps in
//! `recv_timeout` until either an on-demand request arrives or the earliest
//! scheduled refresh comes due.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cryptocast_core::domain::AssetId;
use tracing::{debug, info, warn};

use crate::coordinator::{RefreshCoordinator, RefreshOutcome};

/// Fire-and-forget refresh requests.
pub trait RefreshTrigger: Send + Sync {
    /// Ask for `asset` to be refreshed soon. Must not block on I/O.
    fn request_refresh(&self, asset: AssetId);
}

/// Whether the worker also runs the timer-driven schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Only on-demand requests are served.
    OnDemand,
    /// On-demand requests plus a refresh of each asset every interval.
    Periodic,
}

/// Upper bound on one idle wait, so a missed wakeup cannot stall the loop.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug)]
enum WorkerCommand {
    Refresh(AssetId),
    Shutdown,
}

/// Cloneable sender side of the worker.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    tx: Sender<WorkerCommand>,
    /// One flag per asset: a request is already queued.
    queued: Arc<[AtomicBool; AssetId::COUNT]>,
}

impl RefreshTrigger for RefreshHandle {
    fn request_refresh(&self, asset: AssetId) {
        if self.queued[asset.index()].swap(true, Ordering::AcqRel) {
            return;
        }
        if self.tx.send(WorkerCommand::Refresh(asset)).is_err() {
            debug!(asset = %asset, "refresh worker gone, request dropped");
        }
    }
}

/// Owns the refresh thread; dropping it shuts the thread down.
pub struct RefreshWorker {
    handle: RefreshHandle,
    coordinator: Arc<RefreshCoordinator>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshWorker {
    pub fn spawn(coordinator: Arc<RefreshCoordinator>, mode: RefreshMode) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let queued: Arc<[AtomicBool; AssetId::COUNT]> =
            Arc::new(std::array::from_fn(|_| AtomicBool::new(false)));

        let thread_coordinator = Arc::clone(&coordinator);
        let thread_queued = Arc::clone(&queued);
        let join = thread::Builder::new()
            .name("cryptocast-refresh".into())
            .spawn(move || {
                info!(?mode, provider = thread_coordinator.provider_name(), "refresh worker started");
                loop {
                    let wait = match mode {
                        RefreshMode::Periodic => thread_coordinator
                            .until_next_due(Instant::now())
                            .min(MAX_IDLE_WAIT),
                        RefreshMode::OnDemand => MAX_IDLE_WAIT,
                    };
                    match rx.recv_timeout(wait) {
                        Ok(WorkerCommand::Refresh(asset)) => {
                            thread_queued[asset.index()].store(false, Ordering::Release);
                            log_outcome(asset, &thread_coordinator.refresh(asset));
                        }
                        Ok(WorkerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    if thread_coordinator.is_shut_down() {
                        break;
                    }
                    // Runs after requests too, so a steady request stream
                    // cannot starve the schedule.
                    if mode == RefreshMode::Periodic {
                        for (asset, outcome) in thread_coordinator.run_due(Instant::now()) {
                            log_outcome(asset, &outcome);
                        }
                    }
                }
                info!("refresh worker stopped");
            })?;

        Ok(Self {
            handle: RefreshHandle { tx, queued },
            coordinator,
            join: Mutex::new(Some(join)),
        })
    }

    pub fn handle(&self) -> RefreshHandle {
        self.handle.clone()
    }

    /// Stop the thread and wait for it. In-flight fetches are discarded.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        let _ = self.handle.tx.send(WorkerCommand::Shutdown);
        let join = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join) = join {
            if join.join().is_err() {
                warn!("refresh worker panicked");
            }
        }
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn log_outcome(asset: AssetId, outcome: &RefreshOutcome) {
    match outcome {
        RefreshOutcome::Merged { .. } | RefreshOutcome::Cancelled => {}
        RefreshOutcome::Deferred { until } => debug!(
            asset = %asset,
            in_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
            "refresh deferred"
        ),
        RefreshOutcome::RateLimited { .. } | RefreshOutcome::Failed { .. } => {
            debug!(asset = %asset, ?outcome, "refresh did not merge")
        }
    }
}
