//! The per-instance wrapper: lifecycle state, timestamps, and borrow
//! accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of identity tokens. Tokens are minted once per wrapper and never
/// reused, so registry lookups never consult user-supplied equality.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a pooled instance.
///
/// The `*ReturnToHead` states record that a borrower removed the instance
/// from the idle queue while the evictor was testing it; the evictor puts it
/// back at the head when the test ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PooledState {
    /// In the idle queue, available for borrowing
    Idle,
    /// Checked out to a borrower
    Allocated,
    /// Being examined by the evictor
    Eviction,
    /// Examined by the evictor, claimed by a borrower meanwhile
    EvictionReturnToHead,
    /// Being validated while idle (evictor `test_while_idle` probe)
    Validation,
    /// Being validated on the borrow path, destined for a borrower
    ValidationPreallocated,
    /// Validated while idle, claimed by a borrower meanwhile
    ValidationReturnToHead,
    /// Permanently unusable; destroy has run or is running
    Invalid,
    /// Reclaimed from a borrower that held it too long
    Abandoned,
    /// On the return path, between validate and passivate
    Returning,
}

impl std::fmt::Display for PooledState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Allocated => "allocated",
            Self::Eviction => "eviction",
            Self::EvictionReturnToHead => "eviction-return-to-head",
            Self::Validation => "validation",
            Self::ValidationPreallocated => "validation-preallocated",
            Self::ValidationReturnToHead => "validation-return-to-head",
            Self::Invalid => "invalid",
            Self::Abandoned => "abandoned",
            Self::Returning => "returning",
        };
        f.write_str(name)
    }
}

/// Outcome of [`PooledObject::end_eviction_test`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndEviction {
    /// Survived; the instance never left the idle queue
    StillIdle,
    /// Survived, but a borrower popped it during the test; push it back
    ReturnToHead,
    /// Invalidated or abandoned during the test; nothing to reinsert
    Gone,
}

struct ObjectCore {
    state: PooledState,
    last_borrow: Instant,
    last_return: Instant,
    last_use: Instant,
    borrowed_count: u64,
}

/// Wraps one instance of `T` with its lifecycle state, timestamps, and
/// borrow accounting.
///
/// All state transitions are atomic under the wrapper's own lock, and
/// timestamps are read under the same lock, so derived durations are never
/// negative even under concurrent observation.
pub struct PooledObject<T> {
    subject: T,
    token: u64,
    created_at: Instant,
    core: Mutex<ObjectCore>,
}

impl<T> PooledObject<T> {
    /// Wrap a freshly created subject. The wrapper starts `Idle`.
    pub fn new(subject: T) -> Self {
        let now = Instant::now();
        Self {
            subject,
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            created_at: now,
            core: Mutex::new(ObjectCore {
                state: PooledState::Idle,
                last_borrow: now,
                last_return: now,
                last_use: now,
                borrowed_count: 0,
            }),
        }
    }

    /// The wrapped subject.
    pub fn subject(&self) -> &T {
        &self.subject
    }

    /// Stable identity token; never reused within the process.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// When the subject was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PooledState {
        self.core.lock().state
    }

    /// Number of successful borrows of this instance.
    pub fn borrowed_count(&self) -> u64 {
        self.core.lock().borrowed_count
    }

    /// Instant of the most recent successful borrow.
    pub fn last_borrow_instant(&self) -> Instant {
        self.core.lock().last_borrow
    }

    /// Instant of the most recent return to the idle set.
    pub fn last_return_instant(&self) -> Instant {
        self.core.lock().last_return
    }

    /// Instant of the most recent recorded use.
    pub fn last_use_instant(&self) -> Instant {
        self.core.lock().last_use
    }

    /// Record a use of the subject, refreshing the last-use instant.
    pub fn touch(&self) {
        self.core.lock().last_use = Instant::now();
    }

    /// How long the instance has been idle; zero while it is allocated.
    pub fn idle_duration(&self) -> Duration {
        let core = self.core.lock();
        match core.state {
            PooledState::Idle
            | PooledState::Eviction
            | PooledState::EvictionReturnToHead
            | PooledState::Validation
            | PooledState::ValidationReturnToHead => {
                Instant::now().saturating_duration_since(core.last_return)
            }
            _ => Duration::ZERO,
        }
    }

    /// How long the instance has been allocated; zero while it is idle.
    pub fn active_duration(&self) -> Duration {
        let core = self.core.lock();
        match core.state {
            PooledState::Allocated
            | PooledState::ValidationPreallocated
            | PooledState::Returning => Instant::now().saturating_duration_since(core.last_borrow),
            _ => Duration::ZERO,
        }
    }

    /// Claim the instance for a borrower: `Idle -> Allocated`.
    ///
    /// Returns false without side effects on any other state, except that an
    /// instance under eviction testing is flagged for reinsertion at the
    /// head once the test completes.
    pub(crate) fn allocate(&self) -> bool {
        let mut core = self.core.lock();
        match core.state {
            PooledState::Idle => {
                let now = Instant::now();
                core.state = PooledState::Allocated;
                core.last_borrow = now;
                core.last_use = now;
                core.borrowed_count += 1;
                true
            }
            PooledState::Eviction => {
                core.state = PooledState::EvictionReturnToHead;
                false
            }
            PooledState::Validation => {
                core.state = PooledState::ValidationReturnToHead;
                false
            }
            _ => false,
        }
    }

    /// Enter the return path: `Allocated -> Returning`.
    ///
    /// Fails on every other state so stale or repeated returns are rejected
    /// before any validate/passivate work runs.
    pub(crate) fn begin_return(&self) -> Result<(), PooledState> {
        let mut core = self.core.lock();
        if core.state == PooledState::Allocated {
            core.state = PooledState::Returning;
            Ok(())
        } else {
            Err(core.state)
        }
    }

    /// Complete the return path: `Returning -> Idle`.
    ///
    /// Returns false if the instance was invalidated mid-return, in which
    /// case it must not rejoin the idle queue.
    pub(crate) fn finish_return(&self) -> bool {
        let mut core = self.core.lock();
        if core.state == PooledState::Returning {
            core.state = PooledState::Idle;
            core.last_return = Instant::now();
            true
        } else {
            false
        }
    }

    /// Mark permanently unusable.
    ///
    /// Returns true for exactly one caller; concurrent invalidations
    /// collapse onto that winner so destroy runs once.
    pub(crate) fn invalidate(&self) -> bool {
        let mut core = self.core.lock();
        if core.state == PooledState::Invalid {
            false
        } else {
            core.state = PooledState::Invalid;
            true
        }
    }

    /// Claim the instance for eviction testing: `Idle -> Eviction`.
    pub(crate) fn start_eviction_test(&self) -> bool {
        let mut core = self.core.lock();
        if core.state == PooledState::Idle {
            core.state = PooledState::Eviction;
            true
        } else {
            false
        }
    }

    /// Switch an eviction test into its validation phase so a concurrent
    /// borrow attempt is recorded as a return-to-head claim.
    pub(crate) fn begin_idle_validation(&self) -> bool {
        let mut core = self.core.lock();
        match core.state {
            PooledState::Eviction => {
                core.state = PooledState::Validation;
                true
            }
            PooledState::EvictionReturnToHead => {
                core.state = PooledState::ValidationReturnToHead;
                true
            }
            _ => false,
        }
    }

    /// Finish an eviction test on a surviving instance.
    pub(crate) fn end_eviction_test(&self) -> EndEviction {
        let mut core = self.core.lock();
        match core.state {
            PooledState::Eviction | PooledState::Validation => {
                core.state = PooledState::Idle;
                EndEviction::StillIdle
            }
            PooledState::EvictionReturnToHead | PooledState::ValidationReturnToHead => {
                core.state = PooledState::Idle;
                EndEviction::ReturnToHead
            }
            _ => EndEviction::Gone,
        }
    }

    /// Enter borrow-path validation: `Allocated -> ValidationPreallocated`.
    pub(crate) fn begin_borrow_validation(&self) -> bool {
        let mut core = self.core.lock();
        if core.state == PooledState::Allocated {
            core.state = PooledState::ValidationPreallocated;
            true
        } else {
            false
        }
    }

    /// Leave borrow-path validation. Returns false if the instance was
    /// invalidated while the factory was validating it.
    pub(crate) fn end_borrow_validation(&self) -> bool {
        let mut core = self.core.lock();
        if core.state == PooledState::ValidationPreallocated {
            core.state = PooledState::Allocated;
            true
        } else {
            false
        }
    }

    /// Reclaim from a borrower: `Allocated -> Abandoned`.
    pub(crate) fn mark_abandoned(&self) -> bool {
        let mut core = self.core.lock();
        if core.state == PooledState::Allocated {
            core.state = PooledState::Abandoned;
            true
        } else {
            false
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PooledObject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledObject")
            .field("token", &self.token)
            .field("state", &self.state())
            .field("subject", &self.subject)
            .finish()
    }
}
