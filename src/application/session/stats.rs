//! Lazily created statistics records.

use tracing::{debug, warn};

use crate::application::repos::{Query, RepoError};
use crate::application::session::{Handle, Session, SessionError};
use crate::cache::IdentityKey;
use crate::domain::{
    entities::StatsRecord,
    error::DomainError,
    model::{HasStats, Model},
    types::StatCounter,
};

impl<T: Model + HasStats> Handle<T> {
    /// The statistics record bound to this instance, created and linked on
    /// first access.
    ///
    /// Creation is serialized per record by an advisory lock. The statistics
    /// row is inserted on its own, so a concurrent insert rejected by the
    /// store's uniqueness rule is resolved by binding the record that won
    /// without disturbing other writes staged in `session`. Those are
    /// committed together with the new link.
    pub async fn stats(&self, session: &Session) -> Result<Handle<StatsRecord>, SessionError> {
        if let Some(stats) = self.bound_stats(session).await? {
            return Ok(stats);
        }
        let id = self
            .id()
            .ok_or_else(|| DomainError::invariant(format!("`{}` must be saved before it has statistics", T::KIND)))?;

        let _lock = session.stats_locks().acquire(IdentityKey::of::<T>(id)).await;
        if let Some(stats) = self.bound_stats(session).await? {
            return Ok(stats);
        }

        let by_target = Query::new()
            .eq("target_kind", T::KIND.as_str())
            .eq("target_id", id);
        let stats = match session.filter_one::<StatsRecord>(by_target.clone()).await? {
            Some(existing) => existing,
            None => {
                let visibility = self.with(|record| record.visibility());
                let created = session.create(StatsRecord::for_target(T::KIND, id, visibility));
                match session.insert_isolated(&created).await {
                    Ok(()) => created,
                    Err(SessionError::Commit(RepoError::Duplicate { constraint })) => {
                        debug!(
                            target = "scriptorium::session",
                            kind = %T::KIND,
                            id,
                            constraint = %constraint,
                            "statistics created concurrently; binding existing record"
                        );
                        session
                            .filter_one::<StatsRecord>(by_target)
                            .await?
                            .ok_or_else(|| DomainError::not_found("stats"))?
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        let stats_id = stats
            .id()
            .ok_or_else(|| DomainError::invariant("statistics record has no id after commit"))?;
        self.modify(|record| record.set_stats_id(stats_id));
        self.save(session, true).await?;
        session.identity_cache().note_write(&stats);
        Ok(stats)
    }

    async fn bound_stats(&self, session: &Session) -> Result<Option<Handle<StatsRecord>>, SessionError> {
        let Some(stats_id) = self.with(|record| record.stats_id()) else {
            return Ok(None);
        };
        let stats = session.get_by_id::<StatsRecord>(stats_id).await?;
        if stats.is_none() {
            warn!(
                target = "scriptorium::session",
                kind = %T::KIND,
                stats_id,
                "statistics link does not resolve; recreating"
            );
        }
        Ok(stats)
    }
}

impl Handle<StatsRecord> {
    pub async fn increase(
        &self,
        session: &Session,
        counter: StatCounter,
        delta: i64,
        commit: bool,
    ) -> Result<i64, SessionError> {
        let value = self.modify(|record| {
            let slot = record.counter_mut(counter);
            *slot = slot.saturating_add(delta);
            *slot
        });
        self.save(session, commit).await?;
        Ok(value)
    }

    /// Lower a counter, never below zero.
    pub async fn decrease(
        &self,
        session: &Session,
        counter: StatCounter,
        delta: i64,
        commit: bool,
    ) -> Result<i64, SessionError> {
        let value = self.modify(|record| {
            let slot = record.counter_mut(counter);
            *slot = slot.saturating_sub(delta).max(0);
            *slot
        });
        self.save(session, commit).await?;
        Ok(value)
    }

    pub async fn set(
        &self,
        session: &Session,
        counter: StatCounter,
        value: i64,
        commit: bool,
    ) -> Result<(), SessionError> {
        self.modify(|record| *record.counter_mut(counter) = value);
        self.save(session, commit).await
    }

    pub fn count(&self, counter: StatCounter) -> i64 {
        self.with(|record| match counter {
            StatCounter::View => record.view_count,
            StatCounter::Share => record.share_count,
            StatCounter::Like => record.like_count,
            StatCounter::Unlike => record.unlike_count,
            StatCounter::Post => record.post_count,
            StatCounter::Photo => record.photo_count,
            StatCounter::Comment => record.comment_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::session::SessionFactory;
    use crate::cache::CacheConfig;
    use crate::domain::entities::{PhotoRecord, TagRecord};
    use crate::infra::memory::MemoryStore;

    fn session() -> Session {
        SessionFactory::new(Arc::new(MemoryStore::new()), CacheConfig::default()).open()
    }

    #[tokio::test]
    async fn unsaved_record_has_no_statistics() {
        let session = session();
        let tag = session.create(TagRecord::new("rust"));
        let err = tag.stats(&session).await.expect_err("unsaved");
        assert!(matches!(err, SessionError::Domain(DomainError::Invariant { .. })));
    }

    #[tokio::test]
    async fn hidden_photo_gets_hidden_statistics() {
        let session = session();
        let mut record = PhotoRecord::new("/p.png", "p.png", "p");
        record.public = false;
        let photo = session.create(record);
        photo.save(&session, true).await.expect("save");

        let stats = photo.stats(&session).await.expect("stats");
        stats.with(|record| {
            assert!(!record.public);
            assert_eq!(record.target_kind, crate::domain::types::EntityKind::Photo);
            assert_eq!(record.target_id, photo.id());
        });
    }

    #[tokio::test]
    async fn counters_never_go_negative() {
        let session = session();
        let tag = session.create(TagRecord::new("rust"));
        tag.save(&session, true).await.expect("save");
        let stats = tag.stats(&session).await.expect("stats");

        assert_eq!(stats.increase(&session, StatCounter::Like, 2, true).await.expect("inc"), 2);
        assert_eq!(stats.decrease(&session, StatCounter::Like, 5, true).await.expect("dec"), 0);
        stats.set(&session, StatCounter::View, 40, true).await.expect("set");
        assert_eq!(stats.count(StatCounter::View), 40);
    }
}
