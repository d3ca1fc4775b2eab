//! The pool core: borrow, return, invalidate, eviction, and shutdown.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::config::PoolConfig;
use crate::deque::{IdleDeque, PollError};
use crate::error::{Error, Result, SwallowedErrorListener};
use crate::factory::Factory;
use crate::guard::Pooled;
use crate::object::{EndEviction, PooledObject, PooledState};
use crate::policy::{self, EvictionContext, EvictionPolicy};
use crate::registry::Registry;
use crate::scheduler::{EvictionScheduler, TaskHandle};
use crate::stats::{DestroyReason, PoolMetrics, StatsRecorder};

/// A bounded, thread-safe pool of reusable instances produced by a
/// [`Factory`].
///
/// Cloning is cheap and shares the underlying pool.
pub struct Pool<F: Factory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Factory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("metrics", &self.metrics())
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) struct PoolInner<F: Factory> {
    factory: F,
    config: PoolConfig,
    policy: RwLock<Arc<dyn EvictionPolicy>>,
    idle: IdleDeque<F::Subject>,
    registry: Registry<F::Subject>,
    stats: StatsRecorder,
    /// Registered instances plus in-flight creates; the borrow-path create
    /// throttle reserves slots here before calling the factory.
    tracked: AtomicUsize,
    closed: AtomicBool,
    evictor: Mutex<Option<TaskHandle>>,
    /// Stable oldest-first traversal position carried across eviction runs.
    evict_cursor: Mutex<VecDeque<u64>>,
    listener: Mutex<Option<Arc<dyn SwallowedErrorListener>>>,
}

impl<F: Factory> Pool<F> {
    /// Create a pool over `factory` with the given configuration.
    ///
    /// Validates the configuration and resolves the eviction policy tag; if
    /// `time_between_eviction_runs` is set, registers the background evictor
    /// with the process-wide scheduler.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let policy = policy::resolve(&config.eviction_policy)?;

        tracing::debug!(
            max_total = ?config.max_total,
            max_idle = ?config.max_idle,
            min_idle = config.min_idle,
            lifo = config.lifo,
            fairness = config.fairness,
            "created object pool"
        );

        let inner = Arc::new(PoolInner {
            idle: IdleDeque::new(config.fairness),
            registry: Registry::new(),
            stats: StatsRecorder::new(),
            tracked: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            evictor: Mutex::new(None),
            evict_cursor: Mutex::new(VecDeque::new()),
            listener: Mutex::new(None),
            policy: RwLock::new(policy),
            factory,
            config,
        });

        if let Some(period) = inner.config.time_between_eviction_runs {
            let weak = Arc::downgrade(&inner);
            let handle = EvictionScheduler::global().schedule(period, move || {
                if let Some(pool) = weak.upgrade() {
                    pool.run_eviction();
                }
            });
            *inner.evictor.lock() = Some(handle);
        }

        Ok(Self { inner })
    }

    /// Borrow an instance, waiting up to the configured `max_wait` when the
    /// pool is exhausted and `block_when_exhausted` is set.
    pub fn borrow(&self) -> Result<Pooled<F>> {
        self.borrow_inner(self.inner.config.max_wait)
    }

    /// Borrow with an explicit wait budget, overriding the configured
    /// `max_wait`.
    pub fn borrow_timeout(&self, wait: Duration) -> Result<Pooled<F>> {
        self.borrow_inner(Some(wait))
    }

    fn borrow_inner(&self, wait: Option<Duration>) -> Result<Pooled<F>> {
        let inner = &self.inner;
        let start = Instant::now();
        let deadline = wait.map(|w| start + w);

        loop {
            if inner.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }

            // Idle instance first; otherwise a throttled create. A create
            // failure propagates immediately without consuming the budget.
            let (candidate, newly_created) = match inner.idle.try_poll_first() {
                Some(p) => (Some(p), false),
                None => match inner.create_pooled()? {
                    Some(p) => (Some(p), true),
                    None => (None, false),
                },
            };

            let object = match candidate {
                Some(object) => object,
                None => {
                    if !inner.config.block_when_exhausted {
                        return Err(inner.exhausted_error());
                    }
                    let remaining = match deadline {
                        Some(deadline) => {
                            let left = deadline.saturating_duration_since(Instant::now());
                            if left.is_zero() {
                                return Err(Error::Timeout {
                                    waited: start.elapsed(),
                                });
                            }
                            Some(left)
                        }
                        None => None,
                    };
                    match inner.idle.poll_first(remaining) {
                        Ok(object) => object,
                        Err(PollError::TimedOut) => {
                            return Err(Error::Timeout {
                                waited: start.elapsed(),
                            });
                        }
                        Err(PollError::Interrupted) => return Err(Error::Interrupted),
                        Err(PollError::Closed) => return Err(Error::Closed),
                    }
                }
            };

            if inner.closed.load(Ordering::SeqCst) {
                inner.destroy(&object, DestroyReason::Normal);
                return Err(Error::Closed);
            }

            let idled = object.idle_duration();
            if !object.allocate() {
                // Claimed by the evictor mid-pop; it reinserts at the head.
                continue;
            }

            if let Err(source) = inner.factory.activate(&object) {
                inner.swallow(Error::Factory { source });
                inner.destroy(&object, DestroyReason::Normal);
                inner.replenish_for_waiters();
                continue;
            }

            if inner.config.test_on_borrow || (newly_created && inner.config.test_on_create) {
                let valid = object.begin_borrow_validation() && inner.factory.validate(&object);
                if !(valid && object.end_borrow_validation()) {
                    inner.destroy(&object, DestroyReason::BorrowValidation);
                    inner.replenish_for_waiters();
                    continue;
                }
            }

            inner.stats.record_borrow(start.elapsed(), idled);
            tracing::trace!(token = object.token(), "borrowed instance");
            return Ok(Pooled::new(Arc::clone(inner), object));
        }
    }

    /// Return a borrowed instance to the pool.
    ///
    /// Fails with [`Error::InvalidState`] when the instance is no longer
    /// allocated (it was invalidated or reclaimed); no validation or
    /// passivation runs in that case. Returning to a closed pool destroys
    /// the instance silently.
    pub fn return_object(&self, guard: Pooled<F>) -> Result<()> {
        let (home, object) = guard.into_parts();
        if !Arc::ptr_eq(&home, &self.inner) {
            // Route the instance back to its own pool so it is not lost,
            // then report the misuse.
            home.release_dropped(object);
            return Err(Error::invalid_state(
                "returned object belongs to a different pool",
            ));
        }
        self.inner.do_return(object)
    }

    /// Discard a borrowed instance: it transitions to invalid, is destroyed
    /// exactly once even under concurrent invalidations, and a replacement
    /// is created if borrowers are waiting. Errors from destruction are
    /// swallowed through the listener.
    ///
    /// Fails with [`Error::InvalidState`] when the guard belongs to a
    /// different pool; the instance is left untouched.
    pub fn invalidate(&self, guard: &Pooled<F>) -> Result<()> {
        if !Arc::ptr_eq(guard.pool(), &self.inner) {
            return Err(Error::invalid_state(
                "invalidated object belongs to a different pool",
            ));
        }
        self.inner.destroy(guard.object(), DestroyReason::Normal);
        self.inner.replenish_for_waiters();
        Ok(())
    }

    /// Create one instance, passivate it, and add it to the idle set.
    ///
    /// A no-op when the pool is at `max_total` or the idle set is at
    /// `max_idle`.
    pub fn add_object(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if inner
            .config
            .max_idle
            .is_some_and(|max| inner.idle.len() >= max)
        {
            return Ok(());
        }
        let Some(object) = inner.create_pooled()? else {
            return Ok(());
        };
        if let Err(source) = inner.factory.passivate(&object) {
            inner.destroy(&object, DestroyReason::Normal);
            return Err(Error::Factory { source });
        }
        inner.push_idle(object);
        Ok(())
    }

    /// Pre-warm the pool: add instances until the idle set reaches
    /// `min_idle` or a capacity bound stops growth.
    pub fn prepare(&self) -> Result<()> {
        let floor = self.inner.config.effective_min_idle();
        loop {
            let before = self.inner.idle.len();
            if before >= floor {
                return Ok(());
            }
            self.add_object()?;
            if self.inner.idle.len() <= before {
                // Capacity-capped (or instances went straight to waiters).
                return Ok(());
            }
        }
    }

    /// Run one evictor pass synchronously on the calling thread.
    pub fn evict(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.inner.run_eviction();
        Ok(())
    }

    /// Destroy every idle instance without closing the pool.
    pub fn clear(&self) {
        for object in self.inner.idle.drain() {
            self.inner.destroy(&object, DestroyReason::Normal);
        }
        tracing::debug!("cleared idle instances");
    }

    /// Shut the pool down. Idempotent.
    ///
    /// Cancels the background evictor, releases every blocked borrower with
    /// [`Error::Closed`], and destroys all idle instances. Outstanding
    /// borrowed instances are not forcibly destroyed; they are destroyed
    /// when returned.
    pub fn close(&self) {
        self.inner.close_inner();
    }

    /// Wake every borrower currently blocked in [`borrow`](Pool::borrow)
    /// with [`Error::Interrupted`].
    pub fn interrupt_waiters(&self) {
        self.inner.idle.interrupt_all();
    }

    /// Whether [`close`](Pool::close) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Instances currently checked out to borrowers.
    pub fn num_active(&self) -> usize {
        self.inner.num_active()
    }

    /// Instances currently idle.
    pub fn num_idle(&self) -> usize {
        self.inner.idle.len()
    }

    /// Borrowers currently blocked waiting for an instance.
    pub fn num_waiters(&self) -> usize {
        self.inner.idle.waiter_count()
    }

    /// Counter and timing snapshot.
    pub fn metrics(&self) -> PoolMetrics {
        let inner = &self.inner;
        PoolMetrics {
            num_active: inner.num_active(),
            num_idle: inner.idle.len(),
            num_waiters: inner.idle.waiter_count(),
            created: inner.stats.created(),
            destroyed: inner.stats.destroyed(),
            destroyed_by_evictor: inner.stats.destroyed_by_evictor(),
            destroyed_by_borrow_validation: inner.stats.destroyed_by_borrow_validation(),
            borrowed: inner.stats.borrowed(),
            returned: inner.stats.returned(),
            mean_borrow_wait: inner.stats.mean_borrow_wait(),
            max_borrow_wait: inner.stats.max_borrow_wait(),
            mean_active: inner.stats.mean_active(),
            mean_idle: inner.stats.mean_idle(),
        }
    }

    /// Replace the eviction policy; takes effect from the next pass.
    pub fn set_eviction_policy(&self, policy: Arc<dyn EvictionPolicy>) {
        *self.inner.policy.write() = policy;
    }

    /// Install the listener that receives background errors the pool
    /// swallows.
    pub fn set_swallowed_listener(&self, listener: Arc<dyn SwallowedErrorListener>) {
        *self.inner.listener.lock() = Some(listener);
    }
}

impl<F: Factory> PoolInner<F> {
    fn exhausted_error(&self) -> Error {
        Error::Exhausted {
            active: self.num_active(),
            max_total: self.config.max_total.unwrap_or(usize::MAX),
            waiters: self.idle.waiter_count(),
        }
    }

    fn num_active(&self) -> usize {
        self.registry
            .snapshot()
            .iter()
            .filter(|p| {
                matches!(
                    p.state(),
                    PooledState::Allocated
                        | PooledState::ValidationPreallocated
                        | PooledState::Returning
                )
            })
            .count()
    }

    /// Reserve a capacity slot, create, wrap, and register a new instance.
    ///
    /// `Ok(None)` means the pool is at `max_total`. A factory failure
    /// releases the reservation so later borrows can retry.
    fn create_pooled(&self) -> Result<Option<Arc<PooledObject<F::Subject>>>> {
        if let Some(max) = self.config.max_total {
            let reserved = self
                .tracked
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tracked| {
                    (tracked < max).then_some(tracked + 1)
                });
            if reserved.is_err() {
                return Ok(None);
            }
        } else {
            self.tracked.fetch_add(1, Ordering::SeqCst);
        }

        match self.factory.create() {
            Ok(subject) => {
                let object = Arc::new(self.factory.wrap(subject));
                self.registry.insert(Arc::clone(&object));
                self.stats.record_created();
                tracing::debug!(token = object.token(), "created instance");
                Ok(Some(object))
            }
            Err(source) => {
                self.tracked.fetch_sub(1, Ordering::SeqCst);
                Err(Error::Factory { source })
            }
        }
    }

    /// Destroy an instance exactly once. Safe to call from any state and
    /// from concurrent callers; only the invalidation winner proceeds.
    fn destroy(&self, object: &Arc<PooledObject<F::Subject>>, reason: DestroyReason) {
        if !object.invalidate() {
            return;
        }
        self.idle.remove(object.token());
        if let Err(source) = self.factory.destroy(object) {
            self.swallow(Error::Factory { source });
        }
        self.registry.remove(object.token());
        self.tracked.fetch_sub(1, Ordering::SeqCst);
        self.stats.record_destroyed(reason);
        tracing::debug!(token = object.token(), "destroyed instance");
    }

    fn do_return(&self, object: Arc<PooledObject<F::Subject>>) -> Result<()> {
        if !self.registry.contains(object.token()) {
            return Err(Error::invalid_state(
                "returned object is not tracked by this pool",
            ));
        }
        if let Err(state) = object.begin_return() {
            return Err(Error::invalid_state(format!(
                "returned object is {state}, not allocated"
            )));
        }
        let active_for = Instant::now().saturating_duration_since(object.last_borrow_instant());

        if self.closed.load(Ordering::SeqCst) {
            self.destroy(&object, DestroyReason::Normal);
            return Ok(());
        }

        if self.config.test_on_return && !self.factory.validate(&object) {
            self.destroy(&object, DestroyReason::Normal);
            self.replenish_for_waiters();
            return Ok(());
        }

        if let Err(source) = self.factory.passivate(&object) {
            self.swallow(Error::Factory { source });
            self.destroy(&object, DestroyReason::Normal);
            self.replenish_for_waiters();
            return Ok(());
        }

        if self
            .config
            .max_idle
            .is_some_and(|max| self.idle.len() >= max)
        {
            self.destroy(&object, DestroyReason::Normal);
            return Ok(());
        }

        if !object.finish_return() {
            // Invalidated mid-return; the winner already ran destroy.
            self.destroy(&object, DestroyReason::Normal);
            return Ok(());
        }

        self.stats.record_return(active_for);
        tracing::trace!(token = object.token(), "returned instance");
        self.push_idle(object);
        Ok(())
    }

    /// Drop-time return: expected rejections (already invalidated,
    /// reclaimed, or untracked) are silent; anything else goes to the
    /// listener.
    pub(crate) fn release_dropped(&self, object: Arc<PooledObject<F::Subject>>) {
        match self.do_return(object) {
            Ok(()) | Err(Error::InvalidState { .. }) => {}
            Err(error) => self.swallow(error),
        }
    }

    fn push_idle(&self, object: Arc<PooledObject<F::Subject>>) {
        let rejected = if self.config.lifo {
            self.idle.push_first(object)
        } else {
            self.idle.push_last(object)
        };
        if let Err(object) = rejected {
            // The deque closed while this instance was in flight.
            self.destroy(&object, DestroyReason::Normal);
        }
    }

    /// After a destroy freed capacity, create one replacement if borrowers
    /// are blocked, so a factory outage cannot strand them (livelock
    /// avoidance).
    fn replenish_for_waiters(&self) {
        self.ensure_idle(1, false);
    }

    fn ensure_idle(&self, floor: usize, always: bool) {
        while !self.closed.load(Ordering::SeqCst) && self.idle.len() < floor {
            if !always && !self.idle.has_waiters() {
                break;
            }
            match self.create_pooled() {
                Ok(Some(object)) => self.push_idle(object),
                Ok(None) => break,
                Err(error) => {
                    self.swallow(error);
                    break;
                }
            }
        }
    }

    fn ensure_min_idle(&self) {
        let floor = self.config.effective_min_idle();
        if floor > 0 {
            self.ensure_idle(floor, true);
        }
    }

    /// Next instance to test, continuing the oldest-first traversal from the
    /// previous run and refreshing the snapshot when it is exhausted.
    fn next_eviction_candidate(&self) -> Option<Arc<PooledObject<F::Subject>>> {
        let mut cursor = self.evict_cursor.lock();
        for _ in 0..2 {
            while let Some(token) = cursor.pop_front() {
                if let Some(object) = self.registry.get(token) {
                    return Some(object);
                }
            }
            cursor.extend(
                self.idle
                    .snapshot_oldest_first(self.config.lifo)
                    .iter()
                    .map(|p| p.token()),
            );
            if cursor.is_empty() {
                return None;
            }
        }
        None
    }

    fn run_eviction(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let idle_size = self.idle.len();
        let per_run = self.config.num_tests_per_eviction_run;
        let tests = if per_run > 0 {
            per_run as usize
        } else if per_run < 0 {
            idle_size.div_ceil(per_run.unsigned_abs() as usize)
        } else {
            0
        };

        if tests > 0 && idle_size > 0 {
            let policy = Arc::clone(&*self.policy.read());
            for _ in 0..tests {
                let Some(object) = self.next_eviction_candidate() else {
                    break;
                };
                if !object.start_eviction_test() {
                    // Borrowed (or destroyed) since the snapshot; skip.
                    continue;
                }

                let idled = object.idle_duration();
                let ctx = EvictionContext {
                    idle_count: self.idle.len(),
                    min_idle: self.config.effective_min_idle(),
                    hard_threshold: self.config.effective_min_evictable_idle(),
                    soft_threshold: self.config.effective_soft_min_evictable_idle(),
                };
                if policy.should_evict(&ctx, idled) {
                    self.destroy(&object, DestroyReason::Evictor);
                    continue;
                }

                if self.config.test_while_idle && !self.probe_idle(&object) {
                    self.destroy(&object, DestroyReason::Evictor);
                    continue;
                }

                match object.end_eviction_test() {
                    EndEviction::StillIdle => {}
                    EndEviction::ReturnToHead => {
                        // A borrower popped this object mid-test and gave it
                        // up; restore its original head position regardless
                        // of the pool's push end, or age order scrambles
                        // under FIFO.
                        if let Err(object) = self.idle.push_first(object) {
                            self.destroy(&object, DestroyReason::Normal);
                        }
                    }
                    EndEviction::Gone => {}
                }
            }
        }

        if let Some(limit) = self.config.max_borrow_duration {
            self.reclaim_abandoned(limit);
        }

        self.ensure_min_idle();
    }

    /// `test_while_idle` probe: activate, validate, passivate. Factory
    /// errors are swallowed and the instance is reported unhealthy.
    fn probe_idle(&self, object: &Arc<PooledObject<F::Subject>>) -> bool {
        if let Err(source) = self.factory.activate(object) {
            self.swallow(Error::Factory { source });
            return false;
        }
        if !(object.begin_idle_validation() && self.factory.validate(object)) {
            return false;
        }
        if let Err(source) = self.factory.passivate(object) {
            self.swallow(Error::Factory { source });
            return false;
        }
        true
    }

    fn reclaim_abandoned(&self, limit: Duration) {
        let now = Instant::now();
        for object in self.registry.snapshot() {
            if object.state() == PooledState::Allocated
                && now.saturating_duration_since(object.last_use_instant()) > limit
                && object.mark_abandoned()
            {
                tracing::warn!(token = object.token(), "reclaiming abandoned instance");
                self.destroy(&object, DestroyReason::Normal);
                self.replenish_for_waiters();
            }
        }
    }

    fn close_inner(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.evictor.lock().take() {
            EvictionScheduler::global().cancel(handle, self.config.evictor_shutdown_timeout);
        }
        for object in self.idle.close() {
            self.destroy(&object, DestroyReason::Normal);
        }
        self.evict_cursor.lock().clear();
        tracing::debug!("pool closed");
    }

    fn swallow(&self, error: Error) {
        let listener = self.listener.lock().clone();
        match listener {
            Some(listener) => listener.swallowed(&error),
            None => tracing::warn!(%error, "swallowed pool error"),
        }
    }
}

impl<F: Factory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        // A pool dropped without close() must not leave its task behind.
        if let Some(handle) = self.evictor.get_mut().take() {
            EvictionScheduler::global().cancel(handle, Duration::ZERO);
        }
    }
}
