//! Identity key definitions.

use std::fmt;

use crate::domain::{model::Model, types::EntityKind};

/// `(kind, primary key)` pair identifying one persisted row.
///
/// The kind is the stable type tag, never a display name, so two record types
/// can never collide on the same numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl IdentityKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn of<T: Model>(id: i64) -> Self {
        Self::new(T::KIND, id)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
