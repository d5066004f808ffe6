use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

use scriptorium::{
    application::{
        blog::{posts, site},
        session::SessionFactory,
    },
    cache::CacheConfig,
    config::Settings,
    infra::{
        http::{HttpState, REQUEST_ID_HEADER, build_router},
        memory::MemoryStore,
    },
};

async fn seeded() -> (Router, i64) {
    let sessions = SessionFactory::new(Arc::new(MemoryStore::new()), CacheConfig::default());
    let session = sessions.open();
    site::init_site(&session, &Settings::default().site)
        .await
        .expect("init site");
    let welcome = posts::latest_posts(&session, 1)
        .await
        .expect("latest")
        .pop()
        .and_then(|post| post.id())
        .expect("welcome post");
    session.close();

    let router = build_router(HttpState { sessions, db: None });
    (router, welcome)
}

async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let (router, _) = seeded().await;
    let request = Request::builder()
        .uri("/api/posts/latest")
        .header(REQUEST_ID_HEADER, "trace-7")
        .body(Body::empty())
        .expect("request");
    let response = router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
        Some("trace-7")
    );

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(request).await.expect("response");
    let generated = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .expect("generated id");
    assert!(!generated.is_empty());
}

#[tokio::test]
async fn health_without_database_is_no_content() {
    let (router, _) = seeded().await;
    let (status, _) = send(&router, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn post_detail_counts_views_across_requests() {
    let (router, id) = seeded().await;
    let uri = format!("/api/posts/{id}");

    let (status, first) = send(&router, Method::GET, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["title"], "Hello, world");
    assert_eq!(first["stats"]["view_count"], 1);
    assert_eq!(first["tags"][0]["name"], "welcome");
    assert!(first["author"].get("password").is_none());

    let (_, second) = send(&router, Method::GET, &uri).await;
    assert_eq!(second["stats"]["view_count"], 2);
}

#[tokio::test]
async fn likes_are_counted_and_ranked() {
    let (router, id) = seeded().await;
    let (status, body) = send(&router, Method::POST, &format!("/api/posts/{id}/like")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], 1);
    assert_eq!(body["counter"], "like");

    let (status, hot) = send(&router, Method::GET, "/api/posts/hot?counter=like&count=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hot[0]["id"], id);
}

#[tokio::test]
async fn listings_by_tag_and_category() {
    let (router, id) = seeded().await;

    let (status, latest) = send(&router, Method::GET, "/api/posts/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest.as_array().map(Vec::len), Some(1));

    let (status, hot_tags) = send(&router, Method::GET, "/api/tags/hot").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hot_tags[0]["name"], "welcome");

    let (status, page) = send(&router, Method::GET, "/api/tags/WELCOME/posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["id"], id);

    let (status, _) = send(&router, Method::GET, "/api/tags/welcome/posts?page=4").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_resources_are_not_found() {
    let (router, _) = seeded().await;
    for uri in [
        "/api/posts/9999",
        "/api/tags/missing/posts",
        "/api/categories/missing/posts",
    ] {
        let (status, _) = send(&router, Method::GET, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
    let (status, _) = send(&router, Method::POST, "/api/posts/9999/like").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
