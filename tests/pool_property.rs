//! Property tests for borrow/return invariants.
//!
//! After any sequence of borrow/return operations,
//! `num_active + num_idle <= max_total` always holds, and every guard drop
//! brings the active count back down.

use std::sync::atomic::{AtomicU64, Ordering};

use proptest::prelude::*;
use repool::{BoxError, Error, Factory, Pool, PoolConfig};

struct CountingFactory {
    counter: AtomicU64,
}

impl CountingFactory {
    fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl Factory for CountingFactory {
    type Subject = u64;

    fn create(&self) -> Result<u64, BoxError> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn active_plus_idle_never_exceeds_max_total(
        max_total in 1usize..8,
        max_idle in 0usize..8,
        lifo in any::<bool>(),
        ops in proptest::collection::vec(prop_oneof![Just(true), Just(false)], 1..40),
    ) {
        let config = PoolConfig {
            max_total: Some(max_total),
            max_idle: Some(max_idle),
            lifo,
            block_when_exhausted: false,
            ..Default::default()
        };
        let pool = Pool::new(CountingFactory::new(), config).unwrap();
        let mut guards = Vec::new();

        for op_is_borrow in ops {
            if op_is_borrow {
                match pool.borrow() {
                    Ok(guard) => guards.push(guard),
                    Err(Error::Exhausted { .. }) => {} // expected at capacity
                    Err(other) => panic!("unexpected borrow failure: {other}"),
                }
            } else if let Some(guard) = guards.pop() {
                pool.return_object(guard).unwrap();
            }

            let active = pool.num_active();
            let idle = pool.num_idle();
            prop_assert!(
                active + idle <= max_total,
                "invariant violated: active={} + idle={} > max_total={}",
                active, idle, max_total,
            );
            prop_assert!(idle <= max_idle, "idle={} > max_idle={}", idle, max_idle);
        }

        drop(guards);
        prop_assert_eq!(pool.num_active(), 0, "all guards dropped");

        let metrics = pool.metrics();
        prop_assert!(metrics.returned <= metrics.borrowed);
        prop_assert!(metrics.destroyed <= metrics.created);
    }
}

/// Deterministic companion: rapid cycling maintains the invariant and the
/// borrow/return counters stay balanced.
#[test]
fn rapid_cycling_preserves_invariants() {
    let max_total = 4;
    let config = PoolConfig {
        max_total: Some(max_total),
        ..Default::default()
    };
    let pool = Pool::new(CountingFactory::new(), config).unwrap();

    for _ in 0..50 {
        let guard = pool.borrow().unwrap();
        drop(guard);
        assert!(pool.num_active() + pool.num_idle() <= max_total);
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.borrowed, 50);
    assert_eq!(metrics.returned, 50);
    assert_eq!(metrics.created, 1, "one instance served every cycle");
}
