//! JSON surface over the blog services.
//!
//! Every request runs inside its own data session (see
//! [`session_scope`](crate::cache::session_scope)); handlers receive it as an
//! `Extension<Arc<Session>>`.

mod handlers;
mod middleware;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::application::error::ErrorReport;
use crate::application::session::SessionFactory;
use crate::cache::session_scope;
use crate::infra::db::PostgresStore;

use middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub sessions: SessionFactory,
    /// Present when running against Postgres; used by the health check.
    pub db: Option<PostgresStore>,
}

pub fn build_router(state: HttpState) -> Router {
    let api = Router::new()
        .route("/api/posts/latest", get(handlers::latest_posts))
        .route("/api/posts/hot", get(handlers::hot_posts))
        .route("/api/posts/{id}", get(handlers::post_detail))
        .route("/api/posts/{id}/like", post(handlers::like_post))
        .route("/api/tags/hot", get(handlers::hot_tags))
        .route("/api/tags/{name}/posts", get(handlers::tag_posts))
        .route("/api/categories/{url}/posts", get(handlers::category_posts))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn_with_state(
            state.sessions.clone(),
            session_scope,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .with_state(state)
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health(State(state): State<HttpState>) -> Response {
    let Some(db) = state.db.as_ref() else {
        return StatusCode::NO_CONTENT.into_response();
    };
    match db.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
