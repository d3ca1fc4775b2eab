//! RAII handle for borrowed instances.

use std::sync::Arc;

use crate::factory::Factory;
use crate::object::PooledObject;
use crate::pool::PoolInner;

/// A borrowed instance.
///
/// Dereferences to the subject. Dropping the handle returns the instance to
/// its pool, with any failure routed to the pool's swallowed-error listener;
/// use [`Pool::return_object`](crate::pool::Pool::return_object) to observe
/// the outcome instead, or
/// [`Pool::invalidate`](crate::pool::Pool::invalidate) to discard the
/// instance.
pub struct Pooled<F: Factory> {
    object: Option<Arc<PooledObject<F::Subject>>>,
    pool: Arc<PoolInner<F>>,
}

impl<F: Factory> Pooled<F> {
    pub(crate) fn new(pool: Arc<PoolInner<F>>, object: Arc<PooledObject<F::Subject>>) -> Self {
        Self {
            object: Some(object),
            pool,
        }
    }

    /// The wrapper, exposing lifecycle timestamps and borrow accounting.
    pub fn wrapper(&self) -> &PooledObject<F::Subject> {
        self.object().as_ref()
    }

    pub(crate) fn object(&self) -> &Arc<PooledObject<F::Subject>> {
        self.object
            .as_ref()
            .expect("guard object taken before drop")
    }

    pub(crate) fn pool(&self) -> &Arc<PoolInner<F>> {
        &self.pool
    }

    /// Disassemble without triggering the drop-time return.
    pub(crate) fn into_parts(mut self) -> (Arc<PoolInner<F>>, Arc<PooledObject<F::Subject>>) {
        let object = self.object.take().expect("guard object already taken");
        (Arc::clone(&self.pool), object)
    }
}

impl<F: Factory> std::ops::Deref for Pooled<F> {
    type Target = F::Subject;

    fn deref(&self) -> &F::Subject {
        self.object().subject()
    }
}

impl<F: Factory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.pool.release_dropped(object);
        }
    }
}

impl<F: Factory> std::fmt::Debug for Pooled<F>
where
    F::Subject: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("object", &self.object)
            .finish()
    }
}
