//! Swallowed-error listener: background failures are routed to it, and a
//! panicking listener propagates on the triggering thread without taking
//! the pool down.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use repool::{
    BoxError, Error, Factory, Pool, PoolConfig, PooledObject, SwallowedErrorListener,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Factory whose passivation always fails, forcing a swallow on each return.
struct BrokenPassivation {
    counter: AtomicU64,
}

impl Factory for BrokenPassivation {
    type Subject = u64;

    fn create(&self) -> Result<u64, BoxError> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn passivate(&self, _object: &PooledObject<u64>) -> Result<(), BoxError> {
        Err("passivation failed".into())
    }
}

/// Records swallowed messages; panics on its `panic_on`-th invocation,
/// before recording it.
struct ExplodingListener {
    seen: Mutex<Vec<String>>,
    calls: AtomicU64,
    panic_on: u64,
}

impl SwallowedErrorListener for ExplodingListener {
    fn swallowed(&self, error: &Error) {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(call != self.panic_on, "listener out of capacity");
        self.seen.lock().unwrap().push(error.to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn background_errors_reach_the_listener() {
    let pool = Pool::new(
        BrokenPassivation {
            counter: AtomicU64::new(0),
        },
        PoolConfig::default(),
    )
    .unwrap();
    let listener = Arc::new(ExplodingListener {
        seen: Mutex::new(Vec::new()),
        calls: AtomicU64::new(0),
        panic_on: u64::MAX,
    });
    pool.set_swallowed_listener(listener.clone());

    let guard = pool.borrow().unwrap();
    pool.return_object(guard).unwrap();

    let seen = listener.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("passivation failed"));
}

/// Two swallows land normally; the third panics out of the listener into
/// the caller, and the pool keeps serving afterwards.
#[test]
fn panicking_listener_propagates_to_the_caller() {
    let pool = Pool::new(
        BrokenPassivation {
            counter: AtomicU64::new(0),
        },
        PoolConfig::default(),
    )
    .unwrap();
    let listener = Arc::new(ExplodingListener {
        seen: Mutex::new(Vec::new()),
        calls: AtomicU64::new(0),
        panic_on: 3,
    });
    pool.set_swallowed_listener(listener.clone());

    for _ in 0..2 {
        let guard = pool.borrow().unwrap();
        pool.return_object(guard).unwrap();
    }
    assert_eq!(listener.seen.lock().unwrap().len(), 2);

    let guard = pool.borrow().unwrap();
    let outcome = catch_unwind(AssertUnwindSafe(|| pool.return_object(guard)));
    assert!(outcome.is_err(), "the listener panic reaches the caller");
    assert_eq!(
        listener.seen.lock().unwrap().len(),
        2,
        "the failed call recorded nothing"
    );

    // The pool still serves borrows with a fresh instance.
    let guard = pool.borrow().unwrap();
    assert_eq!(*guard, 3);
    pool.invalidate(&guard).unwrap();
}
