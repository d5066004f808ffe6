//! Request-scoped data session: unit of work plus identity cache.
//!
//! One [`Session`] is opened per request by a [`SessionFactory`] and closed at
//! the request boundary. Single-key lookups go through the identity cache;
//! queries go straight to the store and are de-duplicated by the unit of work.

mod contract;
mod error;
pub mod handle;
mod locks;
mod stats;
pub mod unit_of_work;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::application::pagination::{PageRequest, Paginated, PaginationError};
use crate::application::repos::{Direction, Query, Store};
use crate::cache::{CacheConfig, IdentityCache};
use crate::domain::model::Model;

pub use error::SessionError;
pub use handle::Handle;
pub use locks::{StatsLockGuard, StatsLocks};
pub use unit_of_work::UnitOfWork;

/// Opens sessions that share one store and one set of advisory locks.
#[derive(Clone)]
pub struct SessionFactory {
    store: Arc<dyn Store>,
    cache_config: CacheConfig,
    stats_locks: Arc<StatsLocks>,
}

impl SessionFactory {
    pub fn new(store: Arc<dyn Store>, cache_config: CacheConfig) -> Self {
        Self {
            store,
            cache_config,
            stats_locks: Arc::new(StatsLocks::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn open(&self) -> Session {
        let session = Session {
            uow: UnitOfWork::new(Arc::clone(&self.store)),
            cache: IdentityCache::new(self.cache_config.clone()),
            stats_locks: Arc::clone(&self.stats_locks),
        };
        debug!(
            target = "scriptorium::session",
            session = session.uow.id(),
            "session opened"
        );
        session
    }
}

pub struct Session {
    uow: UnitOfWork,
    cache: IdentityCache,
    stats_locks: Arc<StatsLocks>,
}

impl Session {
    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    pub fn identity_cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub(crate) fn stats_locks(&self) -> &StatsLocks {
        &self.stats_locks
    }

    pub async fn get_by_id<T: Model>(&self, id: i64) -> Result<Option<Handle<T>>, SessionError> {
        self.cache.lookup(&self.uow, Some(id)).await
    }

    /// Output is positionally aligned with `ids`; `None` slots stay `None`.
    pub async fn get_by_ids<T: Model>(
        &self,
        ids: &[Option<i64>],
    ) -> Result<Vec<Option<Handle<T>>>, SessionError> {
        self.cache.lookup_many(&self.uow, ids).await
    }

    pub async fn get_all<T: Model>(
        &self,
        order: Option<(&str, Direction)>,
    ) -> Result<Vec<Handle<T>>, SessionError> {
        let query = match order {
            Some((field, direction)) => Query::new().order_by(field, direction),
            None => Query::new(),
        };
        self.uow.load(&query).await
    }

    pub async fn query<T: Model>(&self, query: &Query) -> Result<Vec<Handle<T>>, SessionError> {
        self.uow.load(query).await
    }

    pub async fn filter_one<T: Model>(&self, query: Query) -> Result<Option<Handle<T>>, SessionError> {
        Ok(self.uow.load(&query.limit(1)).await?.into_iter().next())
    }

    pub async fn check_exist<T: Model>(&self, query: Query) -> Result<bool, SessionError> {
        Ok(self.uow.count::<T>(&query.unbounded()).await? > 0)
    }

    pub async fn count<T: Model>(&self, query: &Query) -> Result<u64, SessionError> {
        self.uow.count::<T>(&query.unbounded()).await
    }

    /// One page of `query`. With `error_on_empty`, an empty page other than
    /// the first is [`PaginationError::OutOfRange`].
    pub async fn paginate<T: Model>(
        &self,
        query: Query,
        page: u64,
        per_page: u64,
        error_on_empty: bool,
    ) -> Result<Paginated<Handle<T>>, SessionError> {
        let request = PageRequest::new(page, per_page)?;
        let items = self
            .uow
            .load::<T>(&query.clone().offset(request.offset()).limit(request.per_page))
            .await?;
        if items.is_empty() && request.page != 1 && error_on_empty {
            return Err(PaginationError::OutOfRange { page }.into());
        }
        let total = if request.page == 1 && (items.len() as u64) < request.per_page {
            items.len() as u64
        } else {
            self.uow.count::<T>(&query.unbounded()).await?
        };
        Ok(Paginated::new(items, request, total))
    }

    /// A new, unsaved instance. Nothing is staged until `save`.
    pub fn create<T: Model>(&self, record: T) -> Handle<T> {
        Handle::new(record)
    }

    /// Insert `handle` through a unit of work of its own, then track it here.
    ///
    /// A rejected insert rolls back nothing staged in this session.
    pub(crate) async fn insert_isolated<T: Model>(&self, handle: &Handle<T>) -> Result<(), SessionError> {
        let isolated = UnitOfWork::new(Arc::clone(self.uow.store()));
        handle.modify(T::before_save);
        isolated.add(handle)?;
        isolated.commit().await?;
        isolated.detach(handle);
        self.uow.reattach(handle)?;
        self.cache.note_write(handle);
        Ok(())
    }

    /// Commit the unit of work and bring the identity cache in line with it:
    /// deleted rows read as missing afterwards, and a failed commit leaves no
    /// entry for rows whose deletion was rolled back.
    pub async fn commit(&self) -> Result<(), SessionError> {
        let deleting = self.uow.staged_deletions();
        match self.uow.commit().await {
            Ok(()) => {
                self.cache.note_deletes(&deleting);
                Ok(())
            }
            Err(err) => {
                self.cache.evict(&deleting);
                Err(err)
            }
        }
    }

    pub async fn rollback(&self) {
        let deleting = self.uow.staged_deletions();
        self.uow.rollback().await;
        self.cache.evict(&deleting);
    }

    /// Request-boundary teardown: drop uncommitted work and every cache entry.
    pub fn close(&self) {
        let dropped = self.uow.discard();
        if dropped > 0 {
            warn!(
                target = "scriptorium::session",
                session = self.uow.id(),
                writes = dropped,
                "discarding uncommitted writes at request end"
            );
        }
        self.cache.clear();
    }
}
