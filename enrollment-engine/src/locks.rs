use std::{collections::HashMap, fmt::Display, hash::Hash, sync::Arc, time::Duration};

use core_types::RetryPolicy;
use log::warn;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::{EngineError, Result};

/// One mutex per key, created on first use and never evicted, so every
/// request for a key serializes on the same section.
pub struct KeyedLocks<K> {
    label: &'static str,
    locks: RwLock<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Copy + Eq + Hash + Display,
{
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn handle(&self, key: K) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(&key) {
            return Arc::clone(lock);
        }
        let mut guard = self.locks.write();
        Arc::clone(guard.entry(key).or_default())
    }

    /// Waits up to `timeout` per attempt, retrying per `policy`.
    pub fn acquire<'a>(
        &self,
        key: K,
        lock: &'a Mutex<()>,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<MutexGuard<'a, ()>> {
        policy
            .retry(|attempt| lock.try_lock_for(timeout).ok_or(attempt + 1))
            .map_err(|attempts| {
                warn!(
                    "[locks] {} {} still held after {} attempts",
                    self.label, key, attempts
                );
                EngineError::Busy {
                    resource: format!("{} {}", self.label, key),
                    attempts,
                }
            })
    }

    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
