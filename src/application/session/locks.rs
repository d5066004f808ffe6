//! Per-record advisory locks serializing lazy statistics creation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cache::IdentityKey;

/// Process-wide lock table shared by every session of a factory.
#[derive(Default)]
pub struct StatsLocks {
    locks: DashMap<IdentityKey, Arc<Mutex<()>>>,
}

impl StatsLocks {
    /// Wait for exclusive access to `key`'s statistics binding.
    pub async fn acquire(&self, key: IdentityKey) -> StatsLockGuard<'_> {
        let lock = Arc::clone(self.locks.entry(key).or_default().value());
        let guard = lock.lock_owned().await;
        StatsLockGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Releases the lock on drop and removes the table entry once nobody waits on it.
pub struct StatsLockGuard<'a> {
    locks: &'a StatsLocks,
    key: IdentityKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StatsLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
