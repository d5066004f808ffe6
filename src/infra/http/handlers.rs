use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
};
use serde::{Deserialize, Serialize};

use crate::application::{
    blog::{categories, posts, tags},
    error::AppError,
    pagination::Paginated,
    session::{Handle, Session, SessionError},
};
use crate::domain::{
    entities::PostRecord,
    model::{Model, Row},
    types::StatCounter,
};

const DEFAULT_LIST_COUNT: u64 = 10;
const MAX_LIST_COUNT: u64 = 50;
const DEFAULT_PER_PAGE: u64 = 10;

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub count: Option<u64>,
    #[serde(default)]
    pub counter: StatCounter,
}

impl CountQuery {
    fn count(&self) -> u64 {
        self.count.unwrap_or(DEFAULT_LIST_COUNT).clamp(1, MAX_LIST_COUNT)
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl PageQuery {
    fn page(&self) -> u64 {
        self.page.unwrap_or(1)
    }
}

#[derive(Debug, Serialize)]
pub struct PageBody {
    pub items: Vec<Row>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub pages: u64,
}

#[derive(Debug, Serialize)]
pub struct CounterBody {
    pub id: i64,
    pub counter: StatCounter,
    pub value: i64,
}

async fn dicts<T: Model>(session: &Session, handles: &[Handle<T>]) -> Result<Vec<Row>, SessionError> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.to_dict(session).await?);
    }
    Ok(out)
}

async fn page_body<T: Model>(
    session: &Session,
    page: Paginated<Handle<T>>,
) -> Result<PageBody, SessionError> {
    Ok(PageBody {
        items: dicts(session, &page.items).await?,
        page: page.page,
        per_page: page.per_page,
        total: page.total,
        pages: page.pages(),
    })
}

/// A post that exists and is visible to readers.
async fn public_post(session: &Session, id: i64) -> Result<Handle<PostRecord>, AppError> {
    session
        .get_by_id::<PostRecord>(id)
        .await?
        .filter(|post| post.with(|record| record.public))
        .ok_or(AppError::NotFound)
}

pub async fn latest_posts(
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<CountQuery>,
) -> Result<Json<Vec<Row>>, AppError> {
    let posts = posts::latest_posts(&session, query.count()).await?;
    Ok(Json(dicts(&session, &posts).await?))
}

pub async fn hot_posts(
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<CountQuery>,
) -> Result<Json<Vec<Row>>, AppError> {
    let posts = posts::hot_posts(&session, query.count(), query.counter).await?;
    Ok(Json(dicts(&session, &posts).await?))
}

/// Post detail; every successful read counts as a view.
pub async fn post_detail(
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<i64>,
) -> Result<Json<Row>, AppError> {
    let post = public_post(&session, id).await?;
    post.stats(&session)
        .await?
        .increase(&session, StatCounter::View, 1, true)
        .await?;
    Ok(Json(post.detail(&session).await?))
}

pub async fn like_post(
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<i64>,
) -> Result<Json<CounterBody>, AppError> {
    let post = public_post(&session, id).await?;
    let value = post
        .stats(&session)
        .await?
        .increase(&session, StatCounter::Like, 1, true)
        .await?;
    Ok(Json(CounterBody {
        id,
        counter: StatCounter::Like,
        value,
    }))
}

pub async fn hot_tags(
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<CountQuery>,
) -> Result<Json<Vec<Row>>, AppError> {
    let tags = tags::hot_tags(&session, query.count()).await?;
    Ok(Json(dicts(&session, &tags).await?))
}

pub async fn tag_posts(
    Extension(session): Extension<Arc<Session>>,
    Path(name): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageBody>, AppError> {
    let tag = tags::get_tag_by_name(&session, &name)
        .await?
        .ok_or(AppError::NotFound)?;
    let page = tag
        .posts(
            &session,
            query.page(),
            query.per_page.unwrap_or(DEFAULT_PER_PAGE).min(MAX_LIST_COUNT),
        )
        .await?;
    Ok(Json(page_body(&session, page).await?))
}

pub async fn category_posts(
    Extension(session): Extension<Arc<Session>>,
    Path(url): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageBody>, AppError> {
    let category = categories::get_by_url(&session, &url)
        .await?
        .ok_or(AppError::NotFound)?;
    let per_page = query.per_page.map(|value| value.min(MAX_LIST_COUNT));
    let page = category
        .posts(&session, query.page(), per_page, false)
        .await?;
    Ok(Json(page_body(&session, page).await?))
}
