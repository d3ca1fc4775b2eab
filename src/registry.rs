//! Insertion-ordered registry of every live instance.
//!
//! Keys are the wrappers' identity tokens, so lookups never touch
//! user-supplied equality or hashing. The registry owns each wrapper from
//! registration until its destroy completes.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::object::PooledObject;

pub(crate) struct Registry<T> {
    entries: Mutex<IndexMap<u64, Arc<PooledObject<T>>>>,
}

impl<T> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
        }
    }

    pub(crate) fn insert(&self, object: Arc<PooledObject<T>>) {
        self.entries.lock().insert(object.token(), object);
    }

    pub(crate) fn get(&self, token: u64) -> Option<Arc<PooledObject<T>>> {
        self.entries.lock().get(&token).cloned()
    }

    pub(crate) fn contains(&self, token: u64) -> bool {
        self.entries.lock().contains_key(&token)
    }

    /// Remove while preserving the insertion order of the survivors.
    pub(crate) fn remove(&self, token: u64) -> Option<Arc<PooledObject<T>>> {
        self.entries.lock().shift_remove(&token)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// All live wrappers in insertion order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<PooledObject<T>>> {
        self.entries.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order_across_removal() {
        let registry: Registry<u32> = Registry::new();
        let objects: Vec<_> = (0..4)
            .map(|n| Arc::new(PooledObject::new(n)))
            .collect();
        for object in &objects {
            registry.insert(Arc::clone(object));
        }

        registry.remove(objects[1].token());
        let order: Vec<u32> = registry.snapshot().iter().map(|p| *p.subject()).collect();
        assert_eq!(order, vec![0, 2, 3]);
    }

    #[test]
    fn lookup_by_token() {
        let registry: Registry<&str> = Registry::new();
        let object = Arc::new(PooledObject::new("conn"));
        registry.insert(Arc::clone(&object));

        assert!(registry.contains(object.token()));
        assert_eq!(registry.len(), 1);
        let found = registry.get(object.token()).unwrap();
        assert_eq!(found.token(), object.token());

        assert!(registry.remove(object.token()).is_some());
        assert!(!registry.contains(object.token()));
        assert!(registry.get(object.token()).is_none());
    }
}
