//! Pool configuration: the full set of tunables with their defaults.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::DEFAULT_POLICY_TAG;

/// Configuration for an object pool.
///
/// `None` on an `Option` field means "unbounded" (capacities, waits) or
/// "never" (eviction thresholds). A threshold explicitly set to zero also
/// reads as never eligible; use the `effective_*` accessors for the
/// normalized values.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Maximum instances tracked at once (idle + borrowed + creating);
    /// `None` = unbounded
    pub max_total: Option<usize>,
    /// Maximum instances retained idle; `None` = unbounded
    pub max_idle: Option<usize>,
    /// Idle floor the evictor maintains, bounded by `max_total`
    pub min_idle: usize,
    /// Push returned instances at the head (true) or tail (false)
    pub lifo: bool,
    /// Serve blocked borrowers strictly in arrival order
    pub fairness: bool,
    /// Block on exhaustion instead of failing fast
    pub block_when_exhausted: bool,
    /// Default borrow wait budget; `None` = wait without bound
    pub max_wait: Option<Duration>,
    /// Validate freshly created instances before first hand-out
    pub test_on_create: bool,
    /// Validate instances on every borrow
    pub test_on_borrow: bool,
    /// Validate instances on return
    pub test_on_return: bool,
    /// Validate idle instances during eviction runs
    pub test_while_idle: bool,
    /// Evictor period; `None` = background eviction disabled
    pub time_between_eviction_runs: Option<Duration>,
    /// Instances examined per run: positive = exact count, negative =
    /// ⌈idle/|n|⌉, zero = maintenance only
    pub num_tests_per_eviction_run: i32,
    /// Hard idle eviction threshold; `None` or zero = never
    pub min_evictable_idle: Option<Duration>,
    /// Soft threshold, applied only above `min_idle`; `None` or zero = never
    pub soft_min_evictable_idle: Option<Duration>,
    /// Built-in eviction policy tag; unknown tags are rejected at
    /// construction
    pub eviction_policy: String,
    /// Grace period for scheduler worker shutdown
    pub evictor_shutdown_timeout: Duration,
    /// Reclaim instances borrowed longer than this; `None` = disabled
    pub max_borrow_duration: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: Some(8),
            max_idle: Some(8),
            min_idle: 0,
            lifo: true,
            fairness: false,
            block_when_exhausted: true,
            max_wait: None,
            test_on_create: false,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            time_between_eviction_runs: None,
            num_tests_per_eviction_run: 3,
            min_evictable_idle: Some(Duration::from_secs(30 * 60)),
            soft_min_evictable_idle: None,
            eviction_policy: DEFAULT_POLICY_TAG.to_string(),
            evictor_shutdown_timeout: Duration::from_secs(10),
            max_borrow_duration: None,
        }
    }
}

fn normalize(threshold: Option<Duration>) -> Duration {
    match threshold {
        Some(d) if !d.is_zero() => d,
        _ => Duration::MAX,
    }
}

impl PoolConfig {
    /// Validate the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_total == Some(0) {
            return Err(Error::configuration("max_total must be greater than 0"));
        }
        if self.max_wait == Some(Duration::ZERO) {
            return Err(Error::configuration(
                "max_wait must be greater than zero; use block_when_exhausted = false to fail fast",
            ));
        }
        if self.time_between_eviction_runs.is_some_and(|p| p.is_zero()) {
            return Err(Error::configuration(
                "time_between_eviction_runs must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Idle floor after bounding by `max_total`.
    #[must_use]
    pub fn effective_min_idle(&self) -> usize {
        match self.max_total {
            Some(max) => self.min_idle.min(max),
            None => self.min_idle,
        }
    }

    /// Hard idle threshold with zero/unset mapped to `Duration::MAX`.
    #[must_use]
    pub fn effective_min_evictable_idle(&self) -> Duration {
        normalize(self.min_evictable_idle)
    }

    /// Soft idle threshold with zero/unset mapped to `Duration::MAX`.
    #[must_use]
    pub fn effective_soft_min_evictable_idle(&self) -> Duration {
        normalize(self.soft_min_evictable_idle)
    }
}
