//! Request-scoped identity cache.
//!
//! Maps `(kind, id)` to the canonical instance of a row for the current unit
//! of work. Entries are non-owning: the unit of work keeps tracked instances
//! alive, the cache only points at them, and a dead pointer is a miss.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use metrics::counter;
use tracing::debug;

use crate::application::session::{
    Handle, SessionError, UnitOfWork,
    handle::TrackedRecord,
};
use crate::cache::{CacheConfig, IdentityKey, lock::mutex_lock};
use crate::domain::model::Model;

const SOURCE: &str = "cache::identity";

pub const HIT_COUNTER: &str = "scriptorium_identity_hit_total";
pub const MISS_COUNTER: &str = "scriptorium_identity_miss_total";
pub const MERGE_COUNTER: &str = "scriptorium_identity_merge_total";

enum CacheEntry {
    Live(Weak<dyn TrackedRecord>),
    /// The store confirmed the row does not exist.
    Missing,
}

enum Cached {
    Live(Arc<dyn TrackedRecord>),
    Missing,
}

pub struct IdentityCache {
    entries: Mutex<HashMap<IdentityKey, CacheEntry>>,
    config: CacheConfig,
}

impl IdentityCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Canonical instance for `id` within `uow`.
    ///
    /// `None` input resolves to `None` without touching the store. A cached
    /// instance that fell out of `uow` is reattached, or merged when `uow`
    /// already tracks another instance of the same row.
    pub async fn lookup<T: Model>(
        &self,
        uow: &UnitOfWork,
        id: Option<i64>,
    ) -> Result<Option<Handle<T>>, SessionError> {
        let Some(id) = id else {
            return Ok(None);
        };
        let key = IdentityKey::of::<T>(id);

        match self.cached(key) {
            Some(Cached::Missing) => {
                counter!(HIT_COUNTER, "kind" => T::KIND.as_str()).increment(1);
                Ok(None)
            }
            Some(Cached::Live(_)) if uow.is_deleting(key) => {
                counter!(HIT_COUNTER, "kind" => T::KIND.as_str()).increment(1);
                Ok(None)
            }
            Some(Cached::Live(record)) => {
                counter!(HIT_COUNTER, "kind" => T::KIND.as_str()).increment(1);
                let handle = Handle::<T>::from_tracked(record)?;
                if uow.contains(&handle) {
                    return Ok(Some(handle));
                }
                self.reclaim(uow, key, handle).await.map(Some)
            }
            None => {
                counter!(MISS_COUNTER, "kind" => T::KIND.as_str()).increment(1);
                let found = uow.get::<T>(id).await?;
                match &found {
                    Some(handle) => self.remember(key, handle),
                    None if self.config.cache_negative_lookups => {
                        mutex_lock(&self.entries, SOURCE, "lookup.missing")
                            .insert(key, CacheEntry::Missing);
                    }
                    None => {}
                }
                debug!(
                    target = "scriptorium::cache::identity",
                    key = %key,
                    found = found.is_some(),
                    "identity cache miss"
                );
                Ok(found)
            }
        }
    }

    /// Batch form of [`lookup`](Self::lookup); output is aligned with `ids`.
    pub async fn lookup_many<T: Model>(
        &self,
        uow: &UnitOfWork,
        ids: &[Option<i64>],
    ) -> Result<Vec<Option<Handle<T>>>, SessionError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.lookup::<T>(uow, *id).await?);
        }
        Ok(out)
    }

    /// Remove the entry for `id`, returning the instance it pointed at.
    pub fn invalidate<T: Model>(&self, id: i64) -> Option<Handle<T>> {
        let removed = mutex_lock(&self.entries, SOURCE, "invalidate").remove(&IdentityKey::of::<T>(id));
        match removed {
            Some(CacheEntry::Live(weak)) => weak
                .upgrade()
                .and_then(|record| Handle::from_tracked(record).ok()),
            _ => None,
        }
    }

    pub fn invalidate_many<T: Model>(&self, ids: &[i64]) -> Vec<Option<Handle<T>>> {
        ids.iter().map(|id| self.invalidate::<T>(*id)).collect()
    }

    /// Register or refresh the entry of a written instance. Instances without
    /// an assigned id are skipped.
    pub fn note_write<T: Model>(&self, handle: &Handle<T>) {
        if let Some(id) = handle.id() {
            self.remember(IdentityKey::of::<T>(id), handle);
        }
    }

    pub fn note_writes<T: Model>(&self, handles: &[Handle<T>]) {
        for handle in handles {
            self.note_write(handle);
        }
    }

    /// Record that the rows behind `keys` were deleted from the store.
    pub fn note_deletes(&self, keys: &[IdentityKey]) {
        let mut entries = mutex_lock(&self.entries, SOURCE, "note_deletes");
        for key in keys {
            if self.config.cache_negative_lookups {
                entries.insert(*key, CacheEntry::Missing);
            } else {
                entries.remove(key);
            }
        }
    }

    /// Drop the entries for `keys`, whatever they hold.
    pub fn evict(&self, keys: &[IdentityKey]) {
        let mut entries = mutex_lock(&self.entries, SOURCE, "evict");
        for key in keys {
            entries.remove(key);
        }
    }

    pub fn clear(&self) {
        let mut entries = mutex_lock(&self.entries, SOURCE, "clear");
        let dropped = entries.len();
        entries.clear();
        debug!(
            target = "scriptorium::cache::identity",
            dropped, "identity cache cleared"
        );
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, key: IdentityKey) -> Option<Cached> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "cached");
        match entries.get(&key) {
            Some(CacheEntry::Missing) => Some(Cached::Missing),
            Some(CacheEntry::Live(weak)) => match weak.upgrade() {
                Some(record) => Some(Cached::Live(record)),
                None => {
                    entries.remove(&key);
                    None
                }
            },
            None => None,
        }
    }

    fn remember<T: Model>(&self, key: IdentityKey, handle: &Handle<T>) {
        let weak = Arc::downgrade(&handle.tracked());
        mutex_lock(&self.entries, SOURCE, "remember").insert(key, CacheEntry::Live(weak));
    }

    async fn reclaim<T: Model>(
        &self,
        uow: &UnitOfWork,
        key: IdentityKey,
        handle: Handle<T>,
    ) -> Result<Handle<T>, SessionError> {
        uow.detach(&handle);
        match uow.reattach(&handle) {
            Ok(()) => {
                debug!(
                    target = "scriptorium::cache::identity",
                    key = %key,
                    "reattached cached record"
                );
                Ok(handle)
            }
            Err(SessionError::IdentityConflict { .. }) => {
                let merged = uow.merge(&handle).await?;
                self.remember(key, &merged);
                counter!(MERGE_COUNTER, "kind" => T::KIND.as_str()).increment(1);
                debug!(
                    target = "scriptorium::cache::identity",
                    key = %key,
                    "merged cached record into session"
                );
                Ok(merged)
            }
            Err(err) => Err(err),
        }
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
