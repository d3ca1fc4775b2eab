//! Process-wide scheduler for periodic pool maintenance.
//!
//! One lazily started worker thread serves every pool in the process. The
//! worker doubles as the reaper: cancellation only flags a task, and the
//! worker prunes flagged tasks on each cycle, exiting when none remain. A
//! later registration spins the worker back up.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

static GLOBAL: OnceLock<EvictionScheduler> = OnceLock::new();

struct TaskEntry {
    id: u64,
    period: Duration,
    next_run: Instant,
    cancelled: bool,
    run: Arc<dyn Fn() + Send + Sync>,
}

struct SchedulerState {
    tasks: Vec<TaskEntry>,
    next_id: u64,
    worker_running: bool,
}

/// Cancellation handle returned by [`EvictionScheduler::schedule`].
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
}

/// Cooperative scheduler owning a single maintenance worker.
pub struct EvictionScheduler {
    state: Mutex<SchedulerState>,
    signal: Condvar,
}

impl EvictionScheduler {
    fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                tasks: Vec::new(),
                next_id: 1,
                worker_running: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// The process-wide scheduler instance.
    pub fn global() -> &'static EvictionScheduler {
        GLOBAL.get_or_init(EvictionScheduler::new)
    }

    /// Register a periodic task. The first run happens one period from now.
    pub fn schedule<F>(&'static self, period: Duration, task: F) -> TaskHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.push(TaskEntry {
            id,
            period,
            next_run: Instant::now() + period,
            cancelled: false,
            run: Arc::new(task),
        });
        if !state.worker_running {
            state.worker_running = true;
            std::thread::Builder::new()
                .name("repool-evictor".to_string())
                .spawn(move || Self::global().worker_loop())
                .expect("failed to spawn evictor worker");
        }
        self.signal.notify_all();
        tracing::debug!(task = id, ?period, "scheduled eviction task");
        TaskHandle { id }
    }

    /// Cancel a task. If that leaves the scheduler empty, wait up to `grace`
    /// for the worker to finish its cycle and exit.
    pub fn cancel(&'static self, handle: TaskHandle, grace: Duration) {
        let deadline = Instant::now() + grace;
        let mut state = self.state.lock();
        if let Some(task) = state.tasks.iter_mut().find(|t| t.id == handle.id) {
            task.cancelled = true;
        }
        self.signal.notify_all();
        while state.worker_running && state.tasks.iter().all(|t| t.cancelled) {
            if self.signal.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    /// Whether the maintenance worker is currently alive.
    pub fn worker_alive(&self) -> bool {
        self.state.lock().worker_running
    }

    fn worker_loop(&'static self) {
        let mut state = self.state.lock();
        loop {
            // Reap cancelled tasks; exit when none remain.
            state.tasks.retain(|t| !t.cancelled);
            if state.tasks.is_empty() {
                state.worker_running = false;
                self.signal.notify_all();
                tracing::debug!("eviction worker exiting, no tasks remain");
                return;
            }

            let now = Instant::now();
            let mut due: Vec<Arc<dyn Fn() + Send + Sync>> = Vec::new();
            let mut next_wake = now + Duration::from_secs(3600);
            for task in &mut state.tasks {
                if task.next_run <= now {
                    due.push(Arc::clone(&task.run));
                    task.next_run = now + task.period;
                }
                next_wake = next_wake.min(task.next_run);
            }

            if due.is_empty() {
                self.signal.wait_until(&mut state, next_wake);
            } else {
                drop(state);
                for run in due {
                    // A panicking maintenance pass must not take the shared
                    // worker down with it.
                    if catch_unwind(AssertUnwindSafe(|| run())).is_err() {
                        tracing::error!("eviction task panicked");
                    }
                }
                state = self.state.lock();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const GRACE: Duration = Duration::from_secs(2);

    fn wait_for(mut check: impl FnMut() -> bool, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        check()
    }

    #[test]
    fn task_fires_periodically_and_worker_stops_after_cancel() {
        let scheduler = EvictionScheduler::global();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let handle = scheduler.schedule(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.worker_alive());
        assert!(
            wait_for(|| fired.load(Ordering::SeqCst) >= 3, GRACE),
            "task should fire repeatedly"
        );

        scheduler.cancel(handle, GRACE);
        // Let any run already in flight at cancel time drain.
        std::thread::sleep(Duration::from_millis(50));
        let after_cancel = fired.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(
            fired.load(Ordering::SeqCst),
            after_cancel,
            "cancelled task must not fire again"
        );
    }

    #[test]
    fn worker_respawns_for_new_registrations() {
        let scheduler = EvictionScheduler::global();
        let first = scheduler.schedule(Duration::from_millis(10), || {});
        scheduler.cancel(first, GRACE);

        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let second = scheduler.schedule(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.worker_alive());
        assert!(wait_for(|| fired.load(Ordering::SeqCst) >= 1, GRACE));
        scheduler.cancel(second, GRACE);
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let scheduler = EvictionScheduler::global();
        let bomb = scheduler.schedule(Duration::from_millis(10), || panic!("boom"));

        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let steady = scheduler.schedule(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(
            wait_for(|| fired.load(Ordering::SeqCst) >= 3, GRACE),
            "healthy task keeps firing alongside a panicking one"
        );
        scheduler.cancel(bomb, GRACE);
        scheduler.cancel(steady, GRACE);
    }

    #[test]
    fn concurrent_register_and_cancel() {
        let scheduler = EvictionScheduler::global();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..20 {
                        let handle = scheduler.schedule(Duration::from_millis(5), || {});
                        scheduler.cancel(handle, Duration::from_millis(50));
                    }
                });
            }
        });
        // Whatever the interleaving, the scheduler stays usable. Worker
        // wind-down is asserted in an isolated integration test, since other
        // tests in this process may hold live tasks.
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let handle = scheduler.schedule(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(wait_for(|| fired.load(Ordering::SeqCst) >= 1, GRACE));
        scheduler.cancel(handle, GRACE);
    }
}
