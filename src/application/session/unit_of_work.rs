//! Unit of work over a [`Store`]: staged writes, atomic commit, membership.
//!
//! Lock order: a record's membership lock is always taken before the session's
//! tracking lock. Neither guard is ever held across an `.await`.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicU64, Ordering},
};

use tracing::{debug, warn};

use crate::application::repos::{Mutation, Query, RepoError, Store};
use crate::application::session::{
    error::SessionError,
    handle::{Handle, TrackedRecord, forget, same_record},
};
use crate::cache::{IdentityKey, lock::mutex_lock};
use crate::domain::model::{ID_FIELD, Model, Row};

const SOURCE: &str = "application::session::unit_of_work";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Upsert,
    Delete,
}

struct Pending {
    record: Arc<dyn TrackedRecord>,
    op: Op,
}

#[derive(Default)]
struct Tracking {
    identity: HashMap<IdentityKey, Arc<dyn TrackedRecord>>,
    pending: Vec<Pending>,
}

impl Tracking {
    fn stage(&mut self, record: Arc<dyn TrackedRecord>, op: Op) {
        if let Some(position) = self
            .pending
            .iter()
            .position(|entry| same_record(&entry.record, &record))
        {
            if self.pending[position].op == op {
                return;
            }
            self.pending.remove(position);
        }
        self.pending.push(Pending { record, op });
    }

    fn deleting(&self, key: IdentityKey) -> bool {
        self.pending.iter().any(|entry| {
            entry.op == Op::Delete
                && entry.record.kind() == key.kind
                && entry.record.record_id() == Some(key.id)
        })
    }

    fn deletions(&self) -> Vec<IdentityKey> {
        self.pending
            .iter()
            .filter(|entry| entry.op == Op::Delete)
            .filter_map(|entry| {
                entry
                    .record
                    .record_id()
                    .map(|id| IdentityKey::new(entry.record.kind(), id))
            })
            .collect()
    }

    fn unstage(&mut self, record: &Arc<dyn TrackedRecord>) {
        self.pending
            .retain(|entry| !same_record(&entry.record, record));
    }

    fn untrack(&mut self, record: &Arc<dyn TrackedRecord>) {
        self.unstage(record);
        if let Some(id) = record.record_id() {
            let key = IdentityKey::new(record.kind(), id);
            if self
                .identity
                .get(&key)
                .is_some_and(|tracked| same_record(tracked, record))
            {
                self.identity.remove(&key);
            }
        }
    }
}

pub(crate) struct SessionState {
    id: u64,
    tracking: Mutex<Tracking>,
}

impl SessionState {
    fn lock(&self, op: &'static str) -> std::sync::MutexGuard<'_, Tracking> {
        mutex_lock(&self.tracking, SOURCE, op)
    }
}

pub struct UnitOfWork {
    store: Arc<dyn Store>,
    state: Arc<SessionState>,
}

impl UnitOfWork {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            state: Arc::new(SessionState {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                tracking: Mutex::new(Tracking::default()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Whether the instance is part of this unit of work's tracked set.
    pub fn contains<T: Model>(&self, handle: &Handle<T>) -> bool {
        self.owns(&handle.tracked())
    }

    /// Stage an insert or update. Staging the same instance twice is a no-op.
    pub fn add<T: Model>(&self, handle: &Handle<T>) -> Result<(), SessionError> {
        self.attach(handle.tracked(), Some(Op::Upsert))
    }

    /// Track a clean persisted instance without staging a write.
    pub fn reattach<T: Model>(&self, handle: &Handle<T>) -> Result<(), SessionError> {
        self.attach(handle.tracked(), None)
    }

    /// Stage a deletion. Deleting an instance that was never stored only
    /// forgets it.
    pub fn delete<T: Model>(&self, handle: &Handle<T>) -> Result<(), SessionError> {
        let record = handle.tracked();
        if record.record_id().is_none() {
            self.expunge(&record);
            return Ok(());
        }
        self.attach(record, Some(Op::Delete))
    }

    /// Remove the instance from whichever unit of work tracks it, dropping any
    /// writes staged for it there.
    pub fn detach<T: Model>(&self, handle: &Handle<T>) {
        let record = handle.tracked();
        let mut membership = mutex_lock(record.membership(), SOURCE, "detach");
        if let Some(owner) = membership.as_ref().and_then(Weak::upgrade) {
            owner.lock("detach").untrack(&record);
            debug!(
                target = "scriptorium::session",
                session = owner.id,
                kind = %record.kind(),
                "detached record"
            );
        }
        *membership = None;
    }

    /// Tracked counterpart of `stale`, carrying `stale`'s field values.
    ///
    /// The tracked instance is found in this unit of work or loaded from the
    /// store; a write is staged only if the copied values differ.
    pub async fn merge<T: Model>(&self, stale: &Handle<T>) -> Result<Handle<T>, SessionError> {
        if self.contains(stale) {
            return Ok(stale.clone());
        }
        let Some(id) = stale.id() else {
            let fresh = Handle::new(stale.snapshot());
            self.add(&fresh)?;
            return Ok(fresh);
        };
        let live = self.get::<T>(id).await?.ok_or(RepoError::NotFound)?;
        let incoming = stale.to_row()?;
        if live.to_row()? != incoming {
            live.tracked().restore(incoming)?;
            self.add(&live)?;
        }
        debug!(
            target = "scriptorium::session",
            session = self.state.id,
            kind = %T::KIND,
            id,
            "merged stale record"
        );
        Ok(live)
    }

    /// Instance for `id`, from the tracked set first and the store second.
    ///
    /// A row staged for deletion reads as absent.
    pub async fn get<T: Model>(&self, id: i64) -> Result<Option<Handle<T>>, SessionError> {
        if self.is_deleting(IdentityKey::of::<T>(id)) {
            return Ok(None);
        }
        if let Some(handle) = self.tracked::<T>(id)? {
            return Ok(Some(handle));
        }
        match self.store.fetch(T::KIND, id).await? {
            Some(row) => self.materialize(row).map(Some),
            None => Ok(None),
        }
    }

    /// Query the store; rows already tracked resolve to their tracked instance
    /// and rows staged for deletion are left out.
    pub async fn load<T: Model>(&self, query: &Query) -> Result<Vec<Handle<T>>, SessionError> {
        let rows = self.store.select(T::KIND, query).await?;
        rows.into_iter()
            .filter(|row| {
                row.get(ID_FIELD)
                    .and_then(serde_json::Value::as_i64)
                    .is_none_or(|id| !self.is_deleting(IdentityKey::of::<T>(id)))
            })
            .map(|row| self.materialize(row))
            .collect()
    }

    /// Keys of the persisted rows currently staged for deletion.
    pub fn staged_deletions(&self) -> Vec<IdentityKey> {
        self.state.lock("staged_deletions").deletions()
    }

    pub(crate) fn is_deleting(&self, key: IdentityKey) -> bool {
        self.state.lock("is_deleting").deleting(key)
    }

    pub async fn count<T: Model>(&self, query: &Query) -> Result<u64, SessionError> {
        Ok(self.store.count(T::KIND, query).await?)
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock("has_pending").pending.is_empty()
    }

    pub fn tracked_len(&self) -> usize {
        self.state.lock("tracked_len").identity.len()
    }

    /// Flush every staged write in one atomic batch.
    ///
    /// On failure the staged work is rolled back and the error is returned as
    /// [`SessionError::Commit`]; the unit of work stays usable.
    pub async fn commit(&self) -> Result<(), SessionError> {
        let pending = std::mem::take(&mut self.state.lock("commit").pending);
        if pending.is_empty() {
            return Ok(());
        }

        let (batch, inserts) = match build_batch(&pending) {
            Ok(built) => built,
            Err(err) => {
                let mut tracking = self.state.lock("commit.restage");
                let staged_since = std::mem::replace(&mut tracking.pending, pending);
                tracking.pending.extend(staged_since);
                return Err(err.into());
            }
        };

        let applied = match self.store.apply(&batch).await {
            Ok(applied) => applied,
            Err(err) => {
                warn!(
                    target = "scriptorium::session",
                    session = self.state.id,
                    writes = batch.len(),
                    error = %err,
                    "commit failed; rolling back"
                );
                self.restore_pending(pending).await;
                return Err(SessionError::Commit(err));
            }
        };

        for (record, id) in inserts.iter().zip(applied.inserted) {
            record.assign_id(id);
            let key = IdentityKey::new(record.kind(), id);
            self.state
                .lock("commit.register")
                .identity
                .insert(key, Arc::clone(record));
        }
        for entry in pending.iter().filter(|entry| entry.op == Op::Delete) {
            self.expunge(&entry.record);
        }

        debug!(
            target = "scriptorium::session",
            session = self.state.id,
            writes = batch.len(),
            "committed"
        );
        Ok(())
    }

    /// Drop staged writes and reload the staged persisted instances from the store.
    pub async fn rollback(&self) {
        let pending = std::mem::take(&mut self.state.lock("rollback").pending);
        self.restore_pending(pending).await;
    }

    /// Drop staged writes without touching the store. Returns how many were dropped.
    pub fn discard(&self) -> usize {
        let pending = std::mem::take(&mut self.state.lock("discard").pending);
        let dropped = pending.len();
        for entry in pending {
            if entry.record.record_id().is_none() {
                forget(&entry.record);
            }
        }
        dropped
    }

    async fn restore_pending(&self, pending: Vec<Pending>) {
        for entry in pending {
            let record = entry.record;
            let Some(id) = record.record_id() else {
                // Never stored: the failed insert leaves nothing to track.
                forget(&record);
                continue;
            };
            match self.store.fetch(record.kind(), id).await {
                Ok(Some(row)) => {
                    if let Err(err) = record.restore(row) {
                        warn!(
                            target = "scriptorium::session",
                            kind = %record.kind(),
                            id,
                            error = %err,
                            "stored document could not be restored; expunging"
                        );
                        self.expunge(&record);
                    }
                }
                Ok(None) => self.expunge(&record),
                Err(err) => {
                    warn!(
                        target = "scriptorium::session",
                        kind = %record.kind(),
                        id,
                        error = %err,
                        "refresh after rollback failed; expunging"
                    );
                    self.expunge(&record);
                }
            }
        }
    }

    fn owns(&self, record: &Arc<dyn TrackedRecord>) -> bool {
        mutex_lock(record.membership(), SOURCE, "owns")
            .as_ref()
            .is_some_and(|owner| std::ptr::eq(owner.as_ptr(), Arc::as_ptr(&self.state)))
    }

    fn attach(&self, record: Arc<dyn TrackedRecord>, op: Option<Op>) -> Result<(), SessionError> {
        let kind = record.kind();
        let mut membership = mutex_lock(record.membership(), SOURCE, "attach");
        match membership.as_ref().and_then(Weak::upgrade) {
            Some(owner) if Arc::ptr_eq(&owner, &self.state) => {
                if let Some(op) = op {
                    self.state
                        .lock("attach.stage")
                        .stage(Arc::clone(&record), op);
                }
                return Ok(());
            }
            Some(_) => return Err(SessionError::ForeignSession { kind }),
            None => {}
        }

        let mut tracking = self.state.lock("attach");
        if let Some(id) = record.record_id() {
            let key = IdentityKey::new(kind, id);
            if let Some(existing) = tracking.identity.get(&key) {
                if !same_record(existing, &record) {
                    return Err(SessionError::IdentityConflict { kind, id });
                }
            }
            tracking.identity.insert(key, Arc::clone(&record));
        }
        *membership = Some(Arc::downgrade(&self.state));
        if let Some(op) = op {
            tracking.stage(Arc::clone(&record), op);
        }
        Ok(())
    }

    fn expunge(&self, record: &Arc<dyn TrackedRecord>) {
        let mut membership = mutex_lock(record.membership(), SOURCE, "expunge");
        if membership
            .as_ref()
            .is_some_and(|owner| std::ptr::eq(owner.as_ptr(), Arc::as_ptr(&self.state)))
        {
            self.state.lock("expunge").untrack(record);
            *membership = None;
        }
    }

    fn tracked<T: Model>(&self, id: i64) -> Result<Option<Handle<T>>, SessionError> {
        let record = self
            .state
            .lock("tracked")
            .identity
            .get(&IdentityKey::of::<T>(id))
            .cloned();
        match record {
            Some(record) => Ok(Some(Handle::from_tracked(record)?)),
            None => Ok(None),
        }
    }

    fn materialize<T: Model>(&self, row: Row) -> Result<Handle<T>, SessionError> {
        let id = row.get(ID_FIELD).and_then(serde_json::Value::as_i64);
        if let Some(tracked) = id.map(|id| self.tracked::<T>(id)).transpose()?.flatten() {
            return Ok(tracked);
        }
        let handle = Handle::new(T::from_row(row)?);
        match self.reattach(&handle) {
            Ok(()) => Ok(handle),
            // Another task registered the same row between the two checks.
            Err(SessionError::IdentityConflict { id, .. }) => self
                .tracked::<T>(id)?
                .ok_or(SessionError::IdentityConflict { kind: T::KIND, id }),
            Err(err) => Err(err),
        }
    }
}

type Batch = (Vec<Mutation>, Vec<Arc<dyn TrackedRecord>>);

/// Mutations in staging order, plus the records whose inserts will be assigned ids.
fn build_batch(pending: &[Pending]) -> Result<Batch, crate::domain::error::DomainError> {
    let mut batch = Vec::with_capacity(pending.len());
    let mut inserts = Vec::new();
    for entry in pending {
        let kind = entry.record.kind();
        let mutation = match (entry.op, entry.record.record_id()) {
            (Op::Upsert, None) => {
                inserts.push(Arc::clone(&entry.record));
                Mutation::Insert {
                    kind,
                    row: entry.record.document()?,
                }
            }
            (Op::Upsert, Some(id)) => Mutation::Update {
                kind,
                id,
                row: entry.record.document()?,
            },
            (Op::Delete, Some(id)) => Mutation::Delete { kind, id },
            (Op::Delete, None) => continue,
        };
        batch.push(mutation);
    }
    Ok((batch, inserts))
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        let tracking = self.state.lock("drop");
        if !tracking.pending.is_empty() {
            warn!(
                target = "scriptorium::session",
                session = self.state.id,
                writes = tracking.pending.len(),
                "unit of work dropped with uncommitted writes"
            );
        }
    }
}
