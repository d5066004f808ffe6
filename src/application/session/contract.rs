//! Create/read/update/delete vocabulary shared by every record kind.

use tracing::{debug, warn};

use crate::application::session::{Handle, Session, SessionError};
use crate::domain::{
    entities::StatsRecord,
    model::{Model, Row},
};

const STATS_KEY: &str = "stats";
const VISIBILITY_FIELD: &str = "public";

impl<T: Model> Handle<T> {
    /// Stage this instance, optionally commit, then refresh its cache entry.
    pub async fn save(&self, session: &Session, commit: bool) -> Result<(), SessionError> {
        self.modify(T::before_save);
        session.unit_of_work().add(self)?;
        if commit {
            session.commit().await?;
        }
        session.identity_cache().note_write(self);
        Ok(())
    }

    /// Assign the changed, updatable fields of `fields` and save if anything changed.
    ///
    /// Identity, protected, private and undeclared names are skipped, as are
    /// values the record type cannot hold. Returns whether a save happened.
    pub async fn update(
        &self,
        session: &Session,
        fields: Row,
        commit: bool,
    ) -> Result<bool, SessionError> {
        let manifest = T::manifest();
        let mut row = self.to_row()?;
        let mut changed = false;
        let mut visibility_changed = false;

        for (name, value) in fields {
            if !manifest.is_updatable(&name) {
                debug!(
                    target = "scriptorium::session",
                    kind = %T::KIND,
                    field = %name,
                    "skipping field that is not updatable"
                );
                continue;
            }
            if row.get(&name) == Some(&value) {
                continue;
            }
            let mut candidate = row.clone();
            candidate.insert(name.clone(), value);
            if let Err(err) = T::from_row(candidate.clone()) {
                warn!(
                    target = "scriptorium::session",
                    kind = %T::KIND,
                    field = %name,
                    error = %err,
                    "skipping value the field cannot hold"
                );
                continue;
            }
            row = candidate;
            changed = true;
            visibility_changed |= name == VISIBILITY_FIELD;
        }

        if !changed {
            return Ok(false);
        }
        let updated = T::from_row(row)?;
        self.modify(|record| *record = updated);

        if visibility_changed {
            self.propagate_visibility(session).await?;
        }
        self.save(session, commit).await?;
        Ok(true)
    }

    /// Delete the statistics record first, then this instance, then commit.
    pub async fn delete(&self, session: &Session, commit: bool) -> Result<(), SessionError> {
        let stats_id = self.with(|record| {
            record
                .stats_binding()
                .and_then(|binding| binding.stats_id())
        });
        if let Some(stats_id) = stats_id {
            let stats = match session.identity_cache().invalidate::<StatsRecord>(stats_id) {
                Some(stats) => Some(stats),
                None => session.unit_of_work().get::<StatsRecord>(stats_id).await?,
            };
            if let Some(stats) = stats {
                session.unit_of_work().delete(&stats)?;
            }
        }
        if let Some(id) = self.id() {
            session.identity_cache().invalidate::<T>(id);
        }
        session.unit_of_work().delete(self)?;
        if commit {
            session.commit().await?;
        }
        Ok(())
    }

    /// Exposed fields plus derived values, without statistics.
    pub fn snapshot_dict(&self) -> Result<Row, SessionError> {
        let mut row = self.to_row()?;
        let mut dict = Row::new();
        for name in T::manifest().exposed() {
            if let Some(value) = row.remove(*name) {
                dict.insert((*name).to_string(), value);
            }
        }
        self.with(|record| record.decorate(&mut dict));
        Ok(dict)
    }

    /// [`snapshot_dict`](Self::snapshot_dict) plus a `stats` sub-snapshot when
    /// a statistics record is already bound. Never creates one.
    pub async fn to_dict(&self, session: &Session) -> Result<Row, SessionError> {
        let mut dict = self.snapshot_dict()?;
        let stats_id = self.with(|record| {
            record
                .stats_binding()
                .and_then(|binding| binding.stats_id())
        });
        if let Some(stats_id) = stats_id {
            if let Some(stats) = session.get_by_id::<StatsRecord>(stats_id).await? {
                dict.insert(STATS_KEY.to_string(), stats.snapshot_dict()?.into());
            }
        }
        Ok(dict)
    }

    async fn propagate_visibility(&self, session: &Session) -> Result<(), SessionError> {
        let binding = self.with(|record| {
            record
                .stats_binding()
                .and_then(|binding| binding.stats_id().zip(binding.visibility()))
        });
        let Some((stats_id, public)) = binding else {
            return Ok(());
        };
        if let Some(stats) = session.get_by_id::<StatsRecord>(stats_id).await? {
            if stats.with(|record| record.public) != public {
                stats.modify(|record| record.public = public);
                stats.save(session, false).await?;
            }
        }
        Ok(())
    }
}
