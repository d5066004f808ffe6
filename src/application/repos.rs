//! Persistence engine contract consumed by the unit of work.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{model::Row, types::EntityKind};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub comparison: Comparison,
    pub value: Value,
}

/// Filter, ordering and window over the documents of one kind.
///
/// The field name `id` addresses the primary key rather than a document field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            comparison: Comparison::Eq,
            value: value.into(),
        });
        self
    }

    pub fn gt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            comparison: Comparison::Gt,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push((field.into(), direction));
        self
    }

    pub fn asc(self, field: impl Into<String>) -> Self {
        self.order_by(field, Direction::Asc)
    }

    pub fn desc(self, field: impl Into<String>) -> Self {
        self.order_by(field, Direction::Desc)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Same filters and ordering without the window; used for counting.
    pub fn unbounded(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            order: self.order.clone(),
            limit: None,
            offset: None,
        }
    }
}

/// One staged write. Rows never carry `id`; it travels separately.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert { kind: EntityKind, row: Row },
    Update { kind: EntityKind, id: i64, row: Row },
    Delete { kind: EntityKind, id: i64 },
}

impl Mutation {
    pub fn kind(&self) -> EntityKind {
        match self {
            Mutation::Insert { kind, .. }
            | Mutation::Update { kind, .. }
            | Mutation::Delete { kind, .. } => *kind,
        }
    }
}

/// Result of an applied batch: ids assigned to inserts, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedBatch {
    pub inserted: Vec<i64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn fetch(&self, kind: EntityKind, id: i64) -> Result<Option<Row>, RepoError>;

    async fn select(&self, kind: EntityKind, query: &Query) -> Result<Vec<Row>, RepoError>;

    async fn count(&self, kind: EntityKind, query: &Query) -> Result<u64, RepoError>;

    /// Apply every mutation or none of them.
    async fn apply(&self, batch: &[Mutation]) -> Result<AppliedBatch, RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_drops_window_only() {
        let query = Query::new()
            .eq("public", true)
            .desc("post_date")
            .limit(5)
            .offset(10);
        let unbounded = query.unbounded();
        assert_eq!(unbounded.filters, query.filters);
        assert_eq!(unbounded.order, query.order);
        assert_eq!(unbounded.limit, None);
        assert_eq!(unbounded.offset, None);
    }
}
