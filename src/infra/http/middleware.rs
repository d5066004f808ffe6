//! Request id propagation and per-request outcome logging.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::{error::ErrorReport, session::Session};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied request id that is passed through unchanged.
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    fn for_request(request: &Request<Body>) -> Self {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.len() <= MAX_REQUEST_ID_LEN)
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self { request_id }
    }
}

/// Tag the request with an id, keeping one the caller sent, and echo it back.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext::for_request(&request);
    let header = HeaderValue::from_str(&ctx.request_id).ok();
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    if let Some(header) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
    response
}

/// State of the request's data session once the handler has returned.
struct SessionOutcome {
    session: u64,
    cached: usize,
    uncommitted: bool,
}

impl SessionOutcome {
    fn of(session: &Session) -> Self {
        Self {
            session: session.unit_of_work().id(),
            cached: session.identity_cache().len(),
            uncommitted: session.unit_of_work().has_pending(),
        }
    }
}

/// Log how each API request ended, together with its data session.
///
/// Runs inside the session scope, so the session is still open here and its
/// uncommitted writes have not been discarded yet.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let start = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let session = request.extensions().get::<Arc<Session>>().cloned();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();
    let outcome = session.as_deref().map(SessionOutcome::of);
    let session_id = outcome.as_ref().map_or(0, |outcome| outcome.session);
    let cached = outcome.as_ref().map_or(0, |outcome| outcome.cached);

    if outcome.as_ref().is_some_and(|outcome| outcome.uncommitted) {
        warn!(
            target = "scriptorium::http::response",
            session = session_id,
            method = %method,
            path = %path,
            request_id = %request_id,
            "handler returned with uncommitted writes"
        );
    }

    match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) if status.is_server_error() => error!(
            target = "scriptorium::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            session = session_id,
            source = report.source,
            chain = ?report.messages,
            request_id = %request_id,
            "request failed"
        ),
        Some(report) => warn!(
            target = "scriptorium::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            session = session_id,
            source = report.source,
            chain = ?report.messages,
            request_id = %request_id,
            "request rejected"
        ),
        // Extractor rejections never reach a handler, so they carry no report.
        None if status.is_client_error() || status.is_server_error() => warn!(
            target = "scriptorium::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            session = session_id,
            request_id = %request_id,
            "request rejected before reaching a handler"
        ),
        None => debug!(
            target = "scriptorium::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            session = session_id,
            cached,
            request_id = %request_id,
            "request served"
        ),
    }

    response
}
