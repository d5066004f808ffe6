//! Capability traits implemented by persisted record types.
//!
//! [`Model`] is the persistence contract every kind opts into; [`HasStats`] is
//! the separate, optional statistics binding. A kind without a counters record
//! simply does not implement `HasStats`.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::domain::{error::DomainError, types::EntityKind};

/// A persisted document: declared field names (plus `id`) mapped to values.
pub type Row = Map<String, Value>;

pub const ID_FIELD: &str = "id";

/// Explicit list of the fields a kind declares, and which of them must never
/// leave the data layer through `to_dict` or be touched by a generic update.
#[derive(Debug)]
pub struct FieldManifest {
    kind: EntityKind,
    fields: &'static [&'static str],
    protected: &'static [&'static str],
    exposed: Vec<&'static str>,
}

impl FieldManifest {
    /// Build a manifest. Protected names must be declared fields.
    pub fn new(
        kind: EntityKind,
        fields: &'static [&'static str],
        protected: &'static [&'static str],
    ) -> Self {
        debug_assert!(
            protected.iter().all(|name| fields.contains(name)),
            "protected fields of `{kind}` must be declared"
        );
        let exposed = fields
            .iter()
            .copied()
            .filter(|name| !name.starts_with('_') && !protected.contains(name))
            .collect();
        Self {
            kind,
            fields,
            protected,
            exposed,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Fields that appear in snapshots, in declaration order. Always includes `id`.
    pub fn exposed(&self) -> &[&'static str] {
        &self.exposed
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.fields.contains(&name)
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(&name)
    }

    /// Whether a generic update may assign `name`.
    pub fn is_updatable(&self, name: &str) -> bool {
        name != ID_FIELD
            && !name.starts_with('_')
            && self.is_declared(name)
            && !self.is_protected(name)
    }
}

/// Persistence contract shared by every record type.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn manifest() -> &'static FieldManifest;

    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    /// Statistics binding, present only for kinds implementing [`HasStats`].
    fn stats_binding(&self) -> Option<&dyn HasStats> {
        None
    }

    /// Adds derived, non-persisted values to a snapshot.
    fn decorate(&self, _dict: &mut Row) {}

    /// Called right before the record is staged for a write.
    fn before_save(&mut self) {}

    fn to_row(&self) -> Result<Row, DomainError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(row)) => Ok(row),
            Ok(other) => Err(DomainError::decode(
                Self::KIND,
                format!("expected an object, found {other}"),
            )),
            Err(err) => Err(DomainError::decode(Self::KIND, err)),
        }
    }

    fn from_row(row: Row) -> Result<Self, DomainError> {
        serde_json::from_value(Value::Object(row)).map_err(|err| DomainError::decode(Self::KIND, err))
    }
}

/// Lazy 1:1 link to a statistics record through a stored foreign key.
pub trait HasStats: Send + Sync {
    fn stats_id(&self) -> Option<i64>;

    fn set_stats_id(&mut self, id: i64);

    /// Visibility flag copied onto the statistics record, for kinds that have one.
    fn visibility(&self) -> Option<bool> {
        None
    }
}
