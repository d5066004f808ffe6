//! In-process [`Store`] for tests and database-less development.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering as AtomicOrdering},
};

use async_trait::async_trait;
use serde_json::Value;

use crate::application::repos::{
    AppliedBatch, Comparison, Direction, Filter, Mutation, Query, RepoError, Store,
};
use crate::cache::lock::mutex_lock;
use crate::domain::{
    model::{ID_FIELD, Row},
    types::EntityKind,
};

const SOURCE: &str = "infra::memory";

/// Name reported when two statistics records target the same row.
pub const STATS_TARGET_CONSTRAINT: &str = "entities_stats_target_key";

#[derive(Clone, Default)]
struct Tables {
    last_id: i64,
    rows: HashMap<EntityKind, BTreeMap<i64, Row>>,
}

impl Tables {
    fn table(&self, kind: EntityKind) -> impl Iterator<Item = (&i64, &Row)> {
        self.rows.get(&kind).into_iter().flat_map(|rows| rows.iter())
    }

    fn ensure_unique_target(&self, id: i64, row: &Row) -> Result<(), RepoError> {
        let target = (row.get("target_kind"), row.get("target_id"));
        if target.1.is_none_or(Value::is_null) {
            return Ok(());
        }
        let taken = self
            .table(EntityKind::Stats)
            .any(|(other, existing)| {
                *other != id && (existing.get("target_kind"), existing.get("target_id")) == target
            });
        if taken {
            return Err(RepoError::Duplicate {
                constraint: STATS_TARGET_CONSTRAINT.to_string(),
            });
        }
        Ok(())
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<Option<i64>, RepoError> {
        match mutation {
            Mutation::Insert { kind, row } => {
                let id = self.last_id + 1;
                if *kind == EntityKind::Stats {
                    self.ensure_unique_target(id, row)?;
                }
                self.last_id = id;
                self.rows.entry(*kind).or_default().insert(id, strip_id(row));
                Ok(Some(id))
            }
            Mutation::Update { kind, id, row } => {
                if *kind == EntityKind::Stats {
                    self.ensure_unique_target(*id, row)?;
                }
                let slot = self
                    .rows
                    .get_mut(kind)
                    .and_then(|rows| rows.get_mut(id))
                    .ok_or(RepoError::NotFound)?;
                *slot = strip_id(row);
                Ok(None)
            }
            Mutation::Delete { kind, id } => {
                self.rows
                    .get_mut(kind)
                    .and_then(|rows| rows.remove(id))
                    .ok_or(RepoError::NotFound)?;
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fetches: AtomicU64,
    fail_next: Mutex<Option<RepoError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` fail with `error` without changing anything.
    pub fn fail_next_commit(&self, error: RepoError) {
        *mutex_lock(&self.fail_next, SOURCE, "fail_next_commit") = Some(error);
    }

    /// Number of single-row fetches served so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(AtomicOrdering::Relaxed)
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        mutex_lock(&self.tables, SOURCE, "len")
            .rows
            .get(&kind)
            .map_or(0, BTreeMap::len)
    }

    fn matching(&self, kind: EntityKind, query: &Query) -> Vec<Row> {
        let tables = mutex_lock(&self.tables, SOURCE, "select");
        let mut rows: Vec<Row> = tables
            .table(kind)
            .filter(|(id, row)| query.filters.iter().all(|filter| matches(**id, row, filter)))
            .map(|(id, row)| with_id(*id, row))
            .collect();
        drop(tables);

        if !query.order.is_empty() {
            rows.sort_by(|left, right| {
                query
                    .order
                    .iter()
                    .map(|(field, direction)| {
                        let ordering = compare_values(field_value(left, field), field_value(right, field));
                        match direction {
                            Direction::Asc => ordering,
                            Direction::Desc => ordering.reverse(),
                        }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }
        rows
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(&self, kind: EntityKind, id: i64) -> Result<Option<Row>, RepoError> {
        self.fetches.fetch_add(1, AtomicOrdering::Relaxed);
        let tables = mutex_lock(&self.tables, SOURCE, "fetch");
        Ok(tables
            .rows
            .get(&kind)
            .and_then(|rows| rows.get(&id))
            .map(|row| with_id(id, row)))
    }

    async fn select(&self, kind: EntityKind, query: &Query) -> Result<Vec<Row>, RepoError> {
        let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(self
            .matching(kind, query)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count(&self, kind: EntityKind, query: &Query) -> Result<u64, RepoError> {
        Ok(self.matching(kind, &query.unbounded()).len() as u64)
    }

    async fn apply(&self, batch: &[Mutation]) -> Result<AppliedBatch, RepoError> {
        if let Some(error) = mutex_lock(&self.fail_next, SOURCE, "apply.fail_next").take() {
            return Err(error);
        }
        let mut tables = mutex_lock(&self.tables, SOURCE, "apply");
        let mut staged = tables.clone();
        let mut applied = AppliedBatch::default();
        for mutation in batch {
            if let Some(id) = staged.apply(mutation)? {
                applied.inserted.push(id);
            }
        }
        *tables = staged;
        Ok(applied)
    }
}

fn strip_id(row: &Row) -> Row {
    let mut row = row.clone();
    row.remove(ID_FIELD);
    row
}

fn with_id(id: i64, row: &Row) -> Row {
    let mut row = row.clone();
    row.insert(ID_FIELD.to_string(), Value::from(id));
    row
}

fn field_value<'a>(row: &'a Row, field: &str) -> &'a Value {
    row.get(field).unwrap_or(&Value::Null)
}

fn matches(id: i64, row: &Row, filter: &Filter) -> bool {
    let id_value;
    let actual = if filter.field == ID_FIELD {
        id_value = Value::from(id);
        &id_value
    } else {
        field_value(row, &filter.field)
    };
    let ordering = compare_values(actual, &filter.value);
    match filter.comparison {
        Comparison::Eq => ordering.is_eq() && rank(actual) == rank(&filter.value),
        Comparison::Gt => ordering.is_gt() && rank(actual) == rank(&filter.value),
    }
}

/// Type rank following Postgres `jsonb` ordering.
fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a.len().cmp(&b.len()).then_with(|| {
            a.iter()
                .zip(b)
                .map(|(x, y)| compare_values(x, y))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        (Value::Object(a), Value::Object(b)) => a.len().cmp(&b.len()),
        _ => rank(left).cmp(&rank(right)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    async fn seed(store: &MemoryStore, rows: Vec<Value>) -> Vec<i64> {
        let batch: Vec<Mutation> = rows
            .into_iter()
            .map(|value| Mutation::Insert {
                kind: EntityKind::Post,
                row: row(value),
            })
            .collect();
        store.apply(&batch).await.expect("seed").inserted
    }

    #[tokio::test]
    async fn select_filters_orders_and_windows() {
        let store = MemoryStore::new();
        seed(
            &store,
            vec![
                json!({"title": "a", "public": true, "sticky": false, "post_date": 3}),
                json!({"title": "b", "public": false, "sticky": false, "post_date": 5}),
                json!({"title": "c", "public": true, "sticky": true, "post_date": 1}),
                json!({"title": "d", "public": true, "sticky": false, "post_date": 9}),
            ],
        )
        .await;

        let query = Query::new()
            .eq("public", true)
            .desc("sticky")
            .desc("post_date");
        let titles: Vec<Value> = store
            .select(EntityKind::Post, &query)
            .await
            .expect("select")
            .into_iter()
            .map(|row| row["title"].clone())
            .collect();
        assert_eq!(titles, vec![json!("c"), json!("d"), json!("a")]);

        let window = store
            .select(EntityKind::Post, &query.clone().offset(1).limit(1))
            .await
            .expect("select");
        assert_eq!(window.len(), 1);
        assert_eq!(window[0]["title"], json!("d"));
        assert_eq!(store.count(EntityKind::Post, &query).await.expect("count"), 3);
    }

    #[tokio::test]
    async fn id_filter_addresses_primary_key() {
        let store = MemoryStore::new();
        let ids = seed(&store, vec![json!({"title": "a"}), json!({"title": "b"})]).await;
        let rows = store
            .select(EntityKind::Post, &Query::new().gt("id", ids[0]))
            .await
            .expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(ids[1]));
    }

    #[tokio::test]
    async fn failed_batch_leaves_nothing_behind() {
        let store = MemoryStore::new();
        let ids = seed(&store, vec![json!({"title": "a"})]).await;
        let batch = vec![
            Mutation::Insert {
                kind: EntityKind::Post,
                row: row(json!({"title": "b"})),
            },
            Mutation::Delete {
                kind: EntityKind::Post,
                id: ids[0] + 100,
            },
        ];
        assert!(matches!(store.apply(&batch).await, Err(RepoError::NotFound)));
        assert_eq!(store.len(EntityKind::Post), 1);
    }

    #[tokio::test]
    async fn stats_target_is_unique() {
        let store = MemoryStore::new();
        let stats = || Mutation::Insert {
            kind: EntityKind::Stats,
            row: row(json!({"target_kind": "post", "target_id": 1})),
        };
        store.apply(&[stats()]).await.expect("first");
        let err = store.apply(&[stats()]).await.expect_err("duplicate");
        assert!(matches!(err, RepoError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let store = MemoryStore::new();
        store.fail_next_commit(RepoError::Timeout);
        assert!(store.apply(&[]).await.is_err());
        assert!(store.apply(&[]).await.is_ok());
    }
}
