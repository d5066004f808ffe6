use thiserror::Error;

use crate::application::{pagination::PaginationError, repos::RepoError};
use crate::domain::{error::DomainError, types::EntityKind};

#[derive(Debug, Error)]
pub enum SessionError {
    /// The store rejected a commit; staged work has already been rolled back.
    #[error("commit failed: {0}")]
    Commit(#[source] RepoError),
    #[error("another `{kind}` instance with id {id} is already tracked")]
    IdentityConflict { kind: EntityKind, id: i64 },
    #[error("`{kind}` record belongs to another live session")]
    ForeignSession { kind: EntityKind },
    #[error(transparent)]
    Store(#[from] RepoError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl SessionError {
    pub fn is_commit_failure(&self) -> bool {
        matches!(self, Self::Commit(_))
    }
}
