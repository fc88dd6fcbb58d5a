use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use pharmastock_core::DrugId;

/// Keyed mutex registry: one lock per drug.
///
/// Serializes the read-decide-commit cycle for a single drug inside this
/// process. Locks for different drugs are independent. An entry only lives
/// while some caller holds or waits on it, so the registry stays as small as
/// the set of drugs currently being written.
#[derive(Debug, Default)]
pub struct DrugLocks {
    inner: RwLock<HashMap<DrugId, Arc<Mutex<()>>>>,
}

impl DrugLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, drug_id: DrugId) -> Arc<Mutex<()>> {
        if let Some(lock) = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&drug_id)
        {
            return Arc::clone(lock);
        }

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(drug_id).or_default())
    }

    /// Drop the entry for `drug_id` if `lock` is the last outstanding handle
    /// besides the map's own. New handles are only cloned under the map lock,
    /// so the count cannot grow while we hold the write guard.
    fn release(&self, drug_id: DrugId, lock: Arc<Mutex<()>>) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let idle = map
            .get(&drug_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            map.remove(&drug_id);
        }
    }

    /// Run `f` while holding the lock for `drug_id`.
    ///
    /// The guarded data is `()`, so a poisoned lock carries no broken state and
    /// is recovered.
    pub fn with_lock<T>(&self, drug_id: DrugId, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(drug_id);
        let out = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(drug_id, lock);
        out
    }

    /// Number of drugs whose lock is currently held or awaited.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
