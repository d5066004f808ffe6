//! Shared handles to tracked record instances.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::application::session::unit_of_work::SessionState;
use crate::cache::lock::{mutex_lock, rw_read, rw_write};
use crate::domain::{
    error::DomainError,
    model::{ID_FIELD, Model, Row},
    types::EntityKind,
};

const SOURCE: &str = "application::session::handle";

pub(crate) type Membership = Mutex<Option<Weak<SessionState>>>;

pub(crate) struct Slot<T> {
    state: RwLock<T>,
    membership: Membership,
}

/// A canonical in-memory instance of one record.
///
/// Clones share the same instance; [`Handle::ptr_eq`] is the referential
/// identity the identity cache guarantees.
pub struct Handle<T>(Arc<Slot<T>>);

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Model + fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = rw_read(&self.0.state, SOURCE, "debug");
        f.debug_tuple("Handle").field(&*state).finish()
    }
}

impl<T: Model> Handle<T> {
    /// Wrap a record in a fresh, untracked instance.
    pub fn new(record: T) -> Self {
        Self(Arc::new(Slot {
            state: RwLock::new(record),
            membership: Mutex::new(None),
        }))
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    pub fn id(&self) -> Option<i64> {
        self.with(|record| record.id())
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let state = rw_read(&self.0.state, SOURCE, "with");
        f(&state)
    }

    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut state = rw_write(&self.0.state, SOURCE, "modify");
        f(&mut state)
    }

    pub fn snapshot(&self) -> T {
        self.with(T::clone)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn to_row(&self) -> Result<Row, DomainError> {
        self.with(|record| record.to_row())
    }

    pub(crate) fn tracked(&self) -> Arc<dyn TrackedRecord> {
        Arc::clone(&self.0) as Arc<dyn TrackedRecord>
    }

    pub(crate) fn is_same(&self, record: &Arc<dyn TrackedRecord>) -> bool {
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(record).cast::<()>()
    }

    /// Recover the typed handle behind an erased record.
    pub(crate) fn from_tracked(record: Arc<dyn TrackedRecord>) -> Result<Self, DomainError> {
        let kind = record.kind();
        record.into_any().downcast::<Slot<T>>().map(Self).map_err(|_| {
            DomainError::invariant(format!(
                "tracked `{kind}` record is not a `{}` instance",
                T::KIND
            ))
        })
    }
}

/// Kind-erased view of a tracked instance, as held by the unit of work and
/// the identity cache.
pub(crate) trait TrackedRecord: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn record_id(&self) -> Option<i64>;

    /// Current state as a document, without `id`.
    fn document(&self) -> Result<Row, DomainError>;

    fn assign_id(&self, id: i64);

    /// Overwrite the in-memory state with a stored document.
    fn restore(&self, row: Row) -> Result<(), DomainError>;

    fn membership(&self) -> &Membership;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Model> TrackedRecord for Slot<T> {
    fn kind(&self) -> EntityKind {
        T::KIND
    }

    fn record_id(&self) -> Option<i64> {
        rw_read(&self.state, SOURCE, "record_id").id()
    }

    fn document(&self) -> Result<Row, DomainError> {
        let mut row = rw_read(&self.state, SOURCE, "document").to_row()?;
        row.remove(ID_FIELD);
        Ok(row)
    }

    fn assign_id(&self, id: i64) {
        rw_write(&self.state, SOURCE, "assign_id").set_id(id);
    }

    fn restore(&self, row: Row) -> Result<(), DomainError> {
        let record = T::from_row(row)?;
        *rw_write(&self.state, SOURCE, "restore") = record;
        Ok(())
    }

    fn membership(&self) -> &Membership {
        &self.membership
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub(crate) fn same_record(left: &Arc<dyn TrackedRecord>, right: &Arc<dyn TrackedRecord>) -> bool {
    Arc::as_ptr(left).cast::<()>() == Arc::as_ptr(right).cast::<()>()
}

/// Clear the membership pointer of a record that is no longer tracked anywhere.
pub(crate) fn forget(record: &Arc<dyn TrackedRecord>) {
    *mutex_lock(record.membership(), SOURCE, "forget") = None;
}
