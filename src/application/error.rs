use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{pagination::PaginationError, repos::RepoError, session::SessionError},
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("resource not found")]
    NotFound,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Coarse classification shared by status codes and public messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    NotFound,
    Invalid,
    Conflict,
    Unavailable,
    Internal,
}

fn classify_domain(err: &DomainError) -> Class {
    match err {
        DomainError::NotFound { .. } => Class::NotFound,
        DomainError::Validation { .. } => Class::Invalid,
        DomainError::Invariant { .. } | DomainError::Decode { .. } => Class::Internal,
    }
}

fn classify_repo(err: &RepoError) -> Class {
    match err {
        RepoError::NotFound => Class::NotFound,
        RepoError::InvalidInput { .. } => Class::Invalid,
        RepoError::Duplicate { .. } | RepoError::Integrity { .. } => Class::Conflict,
        RepoError::Timeout | RepoError::Persistence(_) => Class::Unavailable,
    }
}

fn classify_pagination(err: &PaginationError) -> Class {
    match err {
        PaginationError::OutOfRange { .. } => Class::NotFound,
        PaginationError::InvalidRequest(_) => Class::Invalid,
    }
}

fn classify_session(err: &SessionError) -> Class {
    match err {
        SessionError::Commit(repo) | SessionError::Store(repo) => classify_repo(repo),
        SessionError::Domain(domain) => classify_domain(domain),
        SessionError::Pagination(pagination) => classify_pagination(pagination),
        SessionError::IdentityConflict { .. } | SessionError::ForeignSession { .. } => {
            Class::Internal
        }
    }
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn class(&self) -> Class {
        match self {
            AppError::Domain(err) => classify_domain(err),
            AppError::Session(err) => classify_session(err),
            AppError::Repo(err) => classify_repo(err),
            AppError::Pagination(err) => classify_pagination(err),
            AppError::Infra(InfraError::Database { .. }) => Class::Unavailable,
            AppError::Infra(_) => Class::Internal,
            AppError::NotFound => Class::NotFound,
            AppError::Unexpected(_) => Class::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.class() {
            Class::NotFound => StatusCode::NOT_FOUND,
            Class::Invalid => StatusCode::BAD_REQUEST,
            Class::Conflict => StatusCode::CONFLICT,
            Class::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Class::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            _ => match self.class() {
                Class::NotFound => "Resource not found",
                Class::Invalid => "Request could not be processed",
                Class::Conflict => "Request conflicts with stored data",
                Class::Unavailable => "Service temporarily unavailable",
                Class::Internal => "Unexpected error occurred",
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}
