//! Blocking double-ended queue of idle instances.
//!
//! Insertions hand instances directly to the longest-waiting borrower, so
//! every push wakes exactly one waiter and waiters are served in arrival
//! order regardless of which end the push targeted. Cancellation and pool
//! shutdown travel through the same wake protocol as explicit sentinels.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::object::PooledObject;

/// Why a blocking poll returned without an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollError {
    /// The wait budget ran out
    TimedOut,
    /// `interrupt_all` woke this waiter
    Interrupted,
    /// The deque was closed while waiting
    Closed,
}

enum Slot<T> {
    Waiting,
    Given(Arc<PooledObject<T>>),
    Interrupted,
    Closed,
}

struct Waiter<T> {
    slot: Mutex<Slot<T>>,
    available: Condvar,
}

impl<T> Waiter<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Waiting),
            available: Condvar::new(),
        }
    }

    /// Deliver an outcome and wake the waiter. Lock order is always deque
    /// state before waiter slot.
    fn fulfil(&self, outcome: Slot<T>) {
        *self.slot.lock() = outcome;
        self.available.notify_one();
    }
}

struct DequeState<T> {
    items: VecDeque<Arc<PooledObject<T>>>,
    waiters: VecDeque<Arc<Waiter<T>>>,
    closed: bool,
}

pub(crate) struct IdleDeque<T> {
    state: Mutex<DequeState<T>>,
    /// With fairness on, non-blocking polls must not barge past waiters.
    fair: bool,
}

impl<T> IdleDeque<T> {
    pub(crate) fn new(fair: bool) -> Self {
        Self {
            state: Mutex::new(DequeState {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
            }),
            fair,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub(crate) fn has_waiters(&self) -> bool {
        !self.state.lock().waiters.is_empty()
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn peek_first(&self) -> Option<Arc<PooledObject<T>>> {
        self.state.lock().items.front().cloned()
    }

    /// Push to the head, or hand off to the longest-waiting borrower.
    /// Fails with the instance when the deque is closed.
    pub(crate) fn push_first(
        &self,
        item: Arc<PooledObject<T>>,
    ) -> Result<(), Arc<PooledObject<T>>> {
        self.push(item, true)
    }

    /// Push to the tail, or hand off to the longest-waiting borrower.
    pub(crate) fn push_last(&self, item: Arc<PooledObject<T>>) -> Result<(), Arc<PooledObject<T>>> {
        self.push(item, false)
    }

    fn push(&self, item: Arc<PooledObject<T>>, front: bool) -> Result<(), Arc<PooledObject<T>>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(item);
        }
        if let Some(waiter) = state.waiters.pop_front() {
            waiter.fulfil(Slot::Given(item));
        } else if front {
            state.items.push_front(item);
        } else {
            state.items.push_back(item);
        }
        Ok(())
    }

    /// Non-blocking take from the head.
    pub(crate) fn try_poll_first(&self) -> Option<Arc<PooledObject<T>>> {
        self.try_poll(true)
    }

    /// Non-blocking take from the tail.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn try_poll_last(&self) -> Option<Arc<PooledObject<T>>> {
        self.try_poll(false)
    }

    fn try_poll(&self, front: bool) -> Option<Arc<PooledObject<T>>> {
        let mut state = self.state.lock();
        if self.fair && !state.waiters.is_empty() {
            return None;
        }
        if front {
            state.items.pop_front()
        } else {
            state.items.pop_back()
        }
    }

    /// Blocking take from the head. `None` waits without bound.
    pub(crate) fn poll_first(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Arc<PooledObject<T>>, PollError> {
        self.poll(true, timeout)
    }

    /// Blocking take from the tail. `None` waits without bound.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn poll_last(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Arc<PooledObject<T>>, PollError> {
        self.poll(false, timeout)
    }

    fn poll(
        &self,
        front: bool,
        timeout: Option<Duration>,
    ) -> Result<Arc<PooledObject<T>>, PollError> {
        let waiter = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PollError::Closed);
            }
            if self.fair && !state.waiters.is_empty() {
                // Join the line behind earlier arrivals.
            } else if let Some(item) = if front {
                state.items.pop_front()
            } else {
                state.items.pop_back()
            } {
                return Ok(item);
            }
            let waiter = Arc::new(Waiter::new());
            state.waiters.push_back(Arc::clone(&waiter));
            waiter
        };

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = waiter.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Waiting) {
                Slot::Given(item) => return Ok(item),
                Slot::Interrupted => return Err(PollError::Interrupted),
                Slot::Closed => return Err(PollError::Closed),
                Slot::Waiting => {}
            }
            match deadline {
                Some(deadline) => {
                    if waiter.available.wait_until(&mut slot, deadline).timed_out() {
                        drop(slot);
                        return self.resolve_timed_out_waiter(&waiter);
                    }
                }
                None => waiter.available.wait(&mut slot),
            }
        }
    }

    /// A timed-out waiter may have been handed an instance in the window
    /// between its wakeup and deregistration; settle that race under the
    /// deque lock.
    fn resolve_timed_out_waiter(
        &self,
        waiter: &Arc<Waiter<T>>,
    ) -> Result<Arc<PooledObject<T>>, PollError> {
        let mut state = self.state.lock();
        let mut slot = waiter.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Waiting) {
            Slot::Given(item) => Ok(item),
            Slot::Interrupted => Err(PollError::Interrupted),
            Slot::Closed => Err(PollError::Closed),
            Slot::Waiting => {
                state.waiters.retain(|w| !Arc::ptr_eq(w, waiter));
                Err(PollError::TimedOut)
            }
        }
    }

    /// Remove a specific instance by token. Used when an instance is
    /// destroyed while idle.
    pub(crate) fn remove(&self, token: u64) -> Option<Arc<PooledObject<T>>> {
        let mut state = self.state.lock();
        let index = state.items.iter().position(|p| p.token() == token)?;
        state.items.remove(index)
    }

    /// Take every queued instance, leaving the deque open.
    pub(crate) fn drain(&self) -> Vec<Arc<PooledObject<T>>> {
        self.state.lock().items.drain(..).collect()
    }

    /// Wake every blocked waiter with the interrupted sentinel.
    pub(crate) fn interrupt_all(&self) {
        let mut state = self.state.lock();
        for waiter in state.waiters.drain(..) {
            waiter.fulfil(Slot::Interrupted);
        }
    }

    /// Close the deque: reject future pushes, wake every waiter with the
    /// closed sentinel, and hand back the queued instances for destruction.
    pub(crate) fn close(&self) -> Vec<Arc<PooledObject<T>>> {
        let mut state = self.state.lock();
        state.closed = true;
        for waiter in state.waiters.drain(..) {
            waiter.fulfil(Slot::Closed);
        }
        state.items.drain(..).collect()
    }

    /// The idle instances ordered oldest-return first, for the evictor
    /// cursor. Returns push to the head under LIFO, so the oldest sit at the
    /// tail; under FIFO they sit at the head.
    pub(crate) fn snapshot_oldest_first(&self, lifo: bool) -> Vec<Arc<PooledObject<T>>> {
        let state = self.state.lock();
        if lifo {
            state.items.iter().rev().cloned().collect()
        } else {
            state.items.iter().cloned().collect()
        }
    }
}
