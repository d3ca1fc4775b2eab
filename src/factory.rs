//! The factory contract: how pooled subjects are created, prepared, checked,
//! and released.

use crate::error::BoxError;
use crate::object::PooledObject;

/// Lifecycle callbacks for a pooled subject type.
///
/// The pool delegates construction, cleanup, and validation of subjects to an
/// implementation of this trait. Only [`create`](Factory::create) is
/// required; the remaining methods default to no-ops that accept every
/// subject.
///
/// Guarantees the pool provides to implementations:
/// - a given wrapper is never concurrently activated, passivated, validated,
///   or destroyed;
/// - `create` may be called from multiple borrowing threads at once, bounded
///   by `max_total` minus the instances currently tracked.
pub trait Factory: Send + Sync + 'static {
    /// The subject type this factory produces.
    ///
    /// Borrowers receive shared references that may cross threads, so the
    /// subject manages its own interior mutability where it needs any.
    type Subject: Send + Sync + 'static;

    /// Produce a new raw subject, or fail.
    fn create(&self) -> std::result::Result<Self::Subject, BoxError>;

    /// Produce the wrapper for a freshly created subject.
    ///
    /// The default constructs the standard wrapper; override to seed custom
    /// wrapper state.
    fn wrap(&self, subject: Self::Subject) -> PooledObject<Self::Subject> {
        PooledObject::new(subject)
    }

    /// Check whether an instance is still usable.
    fn validate(&self, _object: &PooledObject<Self::Subject>) -> bool {
        true
    }

    /// Prepare an instance for handing to a borrower.
    fn activate(&self, _object: &PooledObject<Self::Subject>) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Prepare an instance for returning to the idle set.
    fn passivate(
        &self,
        _object: &PooledObject<Self::Subject>,
    ) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Release external resources held by an instance.
    ///
    /// Called exactly once per instance, after it has been marked invalid.
    /// Errors are routed to the pool's swallowed-error listener.
    fn destroy(&self, _object: &PooledObject<Self::Subject>) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}
