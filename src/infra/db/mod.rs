//! Postgres-backed [`Store`]: one JSONB document per row in `entities`.

mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    Postgres, QueryBuilder, Row as _,
    postgres::{PgPool, PgPoolOptions, PgRow},
    query,
    types::Json,
};
use tracing::debug;

use crate::application::repos::{
    AppliedBatch, Comparison, Direction, Filter, Mutation, Query, RepoError, Store,
};
use crate::domain::{
    model::{ID_FIELD, Row},
    types::EntityKind,
};

use util::convert_count;

#[derive(Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Filter]) -> Result<(), RepoError> {
        for filter in filters {
            let operator = match filter.comparison {
                Comparison::Eq => " = ",
                Comparison::Gt => " > ",
            };
            if filter.field == ID_FIELD {
                let id = filter.value.as_i64().ok_or_else(|| RepoError::InvalidInput {
                    message: format!("`id` filter needs an integer, got {}", filter.value),
                })?;
                qb.push(" AND id").push(operator).push_bind(id);
            } else {
                qb.push(" AND data -> ")
                    .push_bind(filter.field.clone())
                    .push(operator)
                    .push_bind(Json(filter.value.clone()));
            }
        }
        Ok(())
    }

    fn push_order(qb: &mut QueryBuilder<'_, Postgres>, order: &[(String, Direction)]) {
        qb.push(" ORDER BY ");
        for (field, direction) in order {
            if field == ID_FIELD {
                qb.push("id");
            } else {
                qb.push("data -> ").push_bind(field.clone());
            }
            qb.push(match direction {
                Direction::Asc => " ASC, ",
                Direction::Desc => " DESC, ",
            });
        }
        qb.push("id ASC");
    }

    fn decode_row(row: &PgRow) -> Result<Row, RepoError> {
        let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
        let data: Value = row.try_get("data").map_err(map_sqlx_error)?;
        let Value::Object(mut document) = data else {
            return Err(RepoError::Integrity {
                message: format!("entity {id} is not a JSON object"),
            });
        };
        document.insert(ID_FIELD.to_string(), Value::from(id));
        Ok(document)
    }

    fn document(row: &Row) -> Json<Row> {
        let mut row = row.clone();
        row.remove(ID_FIELD);
        Json(row)
    }

    fn bound(value: u64) -> i64 {
        i64::try_from(value).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn fetch(&self, kind: EntityKind, id: i64) -> Result<Option<Row>, RepoError> {
        let row = query("SELECT id, data FROM entities WHERE kind = $1 AND id = $2")
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn select(&self, kind: EntityKind, query: &Query) -> Result<Vec<Row>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id, data FROM entities WHERE kind = ");
        qb.push_bind(kind.as_str());
        Self::push_filters(&mut qb, &query.filters)?;
        Self::push_order(&mut qb, &query.order);
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(Self::bound(limit));
        }
        if let Some(offset) = query.offset {
            qb.push(" OFFSET ").push_bind(Self::bound(offset));
        }

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(Self::decode_row).collect()
    }

    async fn count(&self, kind: EntityKind, query: &Query) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM entities WHERE kind = ");
        qb.push_bind(kind.as_str());
        Self::push_filters(&mut qb, &query.filters)?;

        let total: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        convert_count(total)
    }

    async fn apply(&self, batch: &[Mutation]) -> Result<AppliedBatch, RepoError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut applied = AppliedBatch::default();

        for mutation in batch {
            match mutation {
                Mutation::Insert { kind, row } => {
                    let id: i64 = sqlx::query_scalar(
                        "INSERT INTO entities (kind, data) VALUES ($1, $2) RETURNING id",
                    )
                    .bind(kind.as_str())
                    .bind(Self::document(row))
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                    applied.inserted.push(id);
                }
                Mutation::Update { kind, id, row } => {
                    let result = query("UPDATE entities SET data = $3 WHERE kind = $1 AND id = $2")
                        .bind(kind.as_str())
                        .bind(*id)
                        .bind(Self::document(row))
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                    if result.rows_affected() == 0 {
                        return Err(RepoError::NotFound);
                    }
                }
                Mutation::Delete { kind, id } => {
                    let result = query("DELETE FROM entities WHERE kind = $1 AND id = $2")
                        .bind(kind.as_str())
                        .bind(*id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                    if result.rows_affected() == 0 {
                        return Err(RepoError::NotFound);
                    }
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(
            target = "scriptorium::infra::db",
            writes = batch.len(),
            inserted = applied.inserted.len(),
            "batch applied"
        );
        Ok(applied)
    }
}
