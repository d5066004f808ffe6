//! Request-scope teardown for data sessions.
//!
//! Opens one [`Session`] per request, exposes it to handlers as an
//! `Extension<Arc<Session>>`, and closes it after the response is produced.

use std::sync::Arc;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use tracing::{debug, instrument};

use crate::application::session::{Session, SessionFactory};

/// Closes the session when the request future completes or is dropped.
struct Teardown(Arc<Session>);

impl Drop for Teardown {
    fn drop(&mut self) {
        self.0.close();
        debug!(
            target = "scriptorium::cache::identity",
            session = self.0.unit_of_work().id(),
            "request session closed"
        );
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn session_scope(
    State(sessions): State<SessionFactory>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let session = Arc::new(sessions.open());
    request.extensions_mut().insert(Arc::clone(&session));
    let _teardown = Teardown(session);
    next.run(request).await
}
