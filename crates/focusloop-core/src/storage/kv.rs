//! Key-value persistence seam used for the engine snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::DatabaseError;

/// Result of a guarded batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Committed,
    /// The guard rejected the current value; nothing was written.
    Rejected { found: Option<String> },
}

/// Predicate over the current value of a guard key (`None` when absent).
pub type Guard<'a> = &'a dyn Fn(Option<&str>) -> bool;

/// Durable string key-value store.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    fn remove(&self, key: &str) -> Result<(), DatabaseError>;

    /// Apply a batch of writes and removals.
    ///
    /// The default applies them one by one; stores that can commit atomically
    /// should override it.
    fn apply(&self, writes: &[(&str, &str)], removals: &[&str]) -> Result<(), DatabaseError> {
        for (key, value) in writes {
            self.set(key, value)?;
        }
        for key in removals {
            self.remove(key)?;
        }
        Ok(())
    }

    /// Compare-and-set: read `guard_key`, and only if `accept` holds for its
    /// value apply the batch. The read and the writes form one atomic step,
    /// so a concurrent writer cannot slip in between them.
    fn apply_if(
        &self,
        guard_key: &str,
        accept: Guard<'_>,
        writes: &[(&str, &str)],
        removals: &[&str],
    ) -> Result<Applied, DatabaseError>;
}

/// In-memory store. Clones share the same map, which makes it handy for
/// simulating two instances racing on the same keys.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, DatabaseError> {
        self.inner
            .lock()
            .map_err(|_| DatabaseError::QueryFailed("memory store poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DatabaseError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn apply(&self, writes: &[(&str, &str)], removals: &[&str]) -> Result<(), DatabaseError> {
        let mut map = self.lock()?;
        for (key, value) in writes {
            map.insert(key.to_string(), value.to_string());
        }
        for key in removals {
            map.remove(*key);
        }
        Ok(())
    }

    fn apply_if(
        &self,
        guard_key: &str,
        accept: Guard<'_>,
        writes: &[(&str, &str)],
        removals: &[&str],
    ) -> Result<Applied, DatabaseError> {
        let mut map = self.lock()?;
        let found = map.get(guard_key).cloned();
        if !accept(found.as_deref()) {
            return Ok(Applied::Rejected { found });
        }
        for (key, value) in writes {
            map.insert(key.to_string(), value.to_string());
        }
        for key in removals {
            map.remove(*key);
        }
        Ok(Applied::Committed)
    }
}
