//! Pluggable eviction decisions for idle instances.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Tag accepted by [`PoolConfig::eviction_policy`](crate::config::PoolConfig)
/// for the built-in policy.
pub const DEFAULT_POLICY_TAG: &str = "default";

/// Inputs to an eviction decision, captured at test time.
#[derive(Debug, Clone, Copy)]
pub struct EvictionContext {
    /// Instances currently idle, including the candidate
    pub idle_count: usize,
    /// Idle floor the evictor maintains
    pub min_idle: usize,
    /// Effective hard idle threshold; `Duration::MAX` means never
    pub hard_threshold: Duration,
    /// Effective soft idle threshold; `Duration::MAX` means never
    pub soft_threshold: Duration,
}

/// Decides whether an idle instance should be evicted.
pub trait EvictionPolicy: Send + Sync {
    /// True to destroy the candidate, false to keep it idle.
    fn should_evict(&self, ctx: &EvictionContext, idle_duration: Duration) -> bool;
}

/// Evicts when the hard threshold is exceeded, or when the soft threshold is
/// exceeded and more than `min_idle` instances remain idle.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEvictionPolicy;

impl EvictionPolicy for DefaultEvictionPolicy {
    fn should_evict(&self, ctx: &EvictionContext, idle_duration: Duration) -> bool {
        if idle_duration > ctx.hard_threshold {
            return true;
        }
        idle_duration > ctx.soft_threshold && ctx.idle_count > ctx.min_idle
    }
}

/// Resolve a configured policy tag to a policy instance.
pub(crate) fn resolve(tag: &str) -> Result<Arc<dyn EvictionPolicy>> {
    match tag {
        DEFAULT_POLICY_TAG => Ok(Arc::new(DefaultEvictionPolicy)),
        other => Err(Error::configuration(format!(
            "unknown eviction policy tag '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(idle_count: usize, min_idle: usize, hard: Duration, soft: Duration) -> EvictionContext {
        EvictionContext {
            idle_count,
            min_idle,
            hard_threshold: hard,
            soft_threshold: soft,
        }
    }

    #[test]
    fn hard_threshold_evicts_unconditionally() {
        let policy = DefaultEvictionPolicy;
        let ctx = ctx(1, 5, Duration::from_secs(60), Duration::MAX);
        assert!(policy.should_evict(&ctx, Duration::from_secs(61)));
        assert!(!policy.should_evict(&ctx, Duration::from_secs(60)));
    }

    #[test]
    fn soft_threshold_respects_min_idle() {
        let policy = DefaultEvictionPolicy;
        let over = Duration::from_secs(31);
        let soft = Duration::from_secs(30);

        let above_floor = ctx(3, 2, Duration::MAX, soft);
        assert!(policy.should_evict(&above_floor, over));

        let at_floor = ctx(2, 2, Duration::MAX, soft);
        assert!(!policy.should_evict(&at_floor, over));
    }

    #[test]
    fn max_thresholds_never_evict() {
        let policy = DefaultEvictionPolicy;
        let ctx = ctx(100, 0, Duration::MAX, Duration::MAX);
        assert!(!policy.should_evict(&ctx, Duration::from_secs(u64::MAX / 4)));
    }

    #[test]
    fn resolve_known_and_unknown_tags() {
        assert!(resolve(DEFAULT_POLICY_TAG).is_ok());
        let Err(err) = resolve("lru") else {
            panic!("expected an error");
        };
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("lru"));
    }
}
