//! Pool counters and windowed timing statistics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Samples retained per rolling window.
const WINDOW: usize = 100;

/// Why an instance was destroyed; selects the counters to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DestroyReason {
    /// Return-path rejection, invalidate, clear, shutdown, abandonment
    Normal,
    /// Evictor policy or idle-validation failure
    Evictor,
    /// Validation failure on the borrow path
    BorrowValidation,
}

/// Fixed-size sample window: mean over the last `WINDOW` samples, maximum
/// over the pool lifetime.
struct RollingWindow {
    samples: VecDeque<Duration>,
    sum: Duration,
    max: Duration,
}

impl RollingWindow {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW),
            sum: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    fn record(&mut self, sample: Duration) {
        if self.samples.len() == WINDOW {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
            }
        }
        self.samples.push_back(sample);
        self.sum += sample;
        self.max = self.max.max(sample);
    }

    fn mean(&self) -> Duration {
        match u32::try_from(self.samples.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.sum / n,
        }
    }
}

/// Internal recorder shared by the pool's hot paths.
pub(crate) struct StatsRecorder {
    created: AtomicU64,
    destroyed: AtomicU64,
    destroyed_by_evictor: AtomicU64,
    destroyed_by_borrow_validation: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
    borrow_waits: Mutex<RollingWindow>,
    active_times: Mutex<RollingWindow>,
    idle_times: Mutex<RollingWindow>,
}

impl StatsRecorder {
    pub(crate) fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            destroyed_by_evictor: AtomicU64::new(0),
            destroyed_by_borrow_validation: AtomicU64::new(0),
            borrowed: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            borrow_waits: Mutex::new(RollingWindow::new()),
            active_times: Mutex::new(RollingWindow::new()),
            idle_times: Mutex::new(RollingWindow::new()),
        }
    }

    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_destroyed(&self, reason: DestroyReason) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        match reason {
            DestroyReason::Normal => {}
            DestroyReason::Evictor => {
                self.destroyed_by_evictor.fetch_add(1, Ordering::Relaxed);
            }
            DestroyReason::BorrowValidation => {
                self.destroyed_by_borrow_validation
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn record_borrow(&self, waited: Duration, idled: Duration) {
        self.borrowed.fetch_add(1, Ordering::Relaxed);
        self.borrow_waits.lock().record(waited);
        self.idle_times.lock().record(idled);
    }

    pub(crate) fn record_return(&self, active: Duration) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        self.active_times.lock().record(active);
    }

    pub(crate) fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub(crate) fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    pub(crate) fn destroyed_by_evictor(&self) -> u64 {
        self.destroyed_by_evictor.load(Ordering::Relaxed)
    }

    pub(crate) fn destroyed_by_borrow_validation(&self) -> u64 {
        self.destroyed_by_borrow_validation.load(Ordering::Relaxed)
    }

    pub(crate) fn borrowed(&self) -> u64 {
        self.borrowed.load(Ordering::Relaxed)
    }

    pub(crate) fn returned(&self) -> u64 {
        self.returned.load(Ordering::Relaxed)
    }

    pub(crate) fn mean_borrow_wait(&self) -> Duration {
        self.borrow_waits.lock().mean()
    }

    pub(crate) fn max_borrow_wait(&self) -> Duration {
        self.borrow_waits.lock().max
    }

    pub(crate) fn mean_active(&self) -> Duration {
        self.active_times.lock().mean()
    }

    pub(crate) fn mean_idle(&self) -> Duration {
        self.idle_times.lock().mean()
    }
}

/// Point-in-time snapshot of pool counters and timing statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    /// Instances currently checked out
    pub num_active: usize,
    /// Instances currently idle
    pub num_idle: usize,
    /// Borrowers currently blocked
    pub num_waiters: usize,
    /// Instances ever created
    pub created: u64,
    /// Instances ever destroyed
    pub destroyed: u64,
    /// Destroyed by the evictor
    pub destroyed_by_evictor: u64,
    /// Destroyed by borrow-path validation
    pub destroyed_by_borrow_validation: u64,
    /// Successful borrows
    pub borrowed: u64,
    /// Successful returns
    pub returned: u64,
    /// Mean borrow wait over the sample window
    pub mean_borrow_wait: Duration,
    /// Longest borrow wait observed
    pub max_borrow_wait: Duration,
    /// Mean checked-out duration over the sample window
    pub mean_active: Duration,
    /// Mean idle duration (at borrow time) over the sample window
    pub mean_idle: Duration,
}
