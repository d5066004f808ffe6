use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scriptorium::{
    application::{
        blog::{posts, users},
        repos::{AppliedBatch, Mutation, Query, RepoError, Store},
        session::{Handle, Session, SessionError, SessionFactory},
    },
    cache::CacheConfig,
    domain::{
        encoded,
        entities::{PostRecord, StatsRecord, TagRecord, UserRecord},
        model::{Model, Row},
        types::{EntityKind, StatCounter, UserRole},
    },
    infra::memory::MemoryStore,
};

struct Fixture {
    store: Arc<MemoryStore>,
    sessions: SessionFactory,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    fn with_config(config: CacheConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sessions = SessionFactory::new(store.clone(), config);
        Self { store, sessions }
    }
}

async fn saved_post(session: &Session, title: &str) -> Handle<PostRecord> {
    let post = session.create(PostRecord::new(None, None, title, "body"));
    post.save(session, true).await.expect("save post");
    post
}

#[tokio::test]
async fn repeated_lookups_return_one_instance() {
    let fixture = Fixture::new();
    let id = {
        let session = fixture.sessions.open();
        saved_post(&session, "stable").await.id().expect("id")
    };

    let session = fixture.sessions.open();
    let before = fixture.store.fetch_count();
    let first = session
        .get_by_id::<PostRecord>(id)
        .await
        .expect("lookup")
        .expect("exists");
    let second = session
        .get_by_id::<PostRecord>(id)
        .await
        .expect("lookup")
        .expect("exists");
    assert!(first.ptr_eq(&second));
    assert_eq!(fixture.store.fetch_count(), before + 1);

    first.modify(|record| record.title = "edited in memory".to_string());
    assert_eq!(second.with(|record| record.title.clone()), "edited in memory");
}

#[tokio::test]
async fn invalidation_forces_a_fresh_read() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let post = saved_post(&session, "cached").await;
    let id = post.id().expect("id");

    let evicted = session.identity_cache().invalidate::<PostRecord>(id);
    assert!(evicted.is_some_and(|evicted| evicted.ptr_eq(&post)));

    // The unit of work still tracks the instance, so identity survives eviction.
    let again = session
        .get_by_id::<PostRecord>(id)
        .await
        .expect("lookup")
        .expect("exists");
    assert!(again.ptr_eq(&post));
}

#[tokio::test]
async fn batch_lookup_keeps_positions() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let a = saved_post(&session, "a").await;
    let b = saved_post(&session, "b").await;

    let found = session
        .get_by_ids::<PostRecord>(&[b.id(), None, Some(9_999), a.id()])
        .await
        .expect("batch lookup");
    assert_eq!(found.len(), 4);
    assert!(found[0].as_ref().is_some_and(|post| post.ptr_eq(&b)));
    assert!(found[1].is_none());
    assert!(found[2].is_none());
    assert!(found[3].as_ref().is_some_and(|post| post.ptr_eq(&a)));
}

#[tokio::test]
async fn saved_record_is_served_from_the_cache() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let post = saved_post(&session, "fresh").await;
    let before = fixture.store.fetch_count();

    let found = session
        .get_by_id::<PostRecord>(post.id().expect("id"))
        .await
        .expect("lookup")
        .expect("exists");
    assert!(found.ptr_eq(&post));
    assert_eq!(fixture.store.fetch_count(), before);
}

#[tokio::test]
async fn negative_lookups_are_remembered_only_when_enabled() {
    for remember in [true, false] {
        let fixture = Fixture::with_config(CacheConfig {
            cache_negative_lookups: remember,
        });
        let session = fixture.sessions.open();
        assert!(session.get_by_id::<UserRecord>(42).await.expect("lookup").is_none());
        let before = fixture.store.fetch_count();
        assert!(session.get_by_id::<UserRecord>(42).await.expect("lookup").is_none());
        let expected = if remember { before } else { before + 1 };
        assert_eq!(fixture.store.fetch_count(), expected);
    }
}

#[tokio::test]
async fn delete_removes_statistics_first() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let post = saved_post(&session, "doomed").await;
    let id = post.id().expect("id");
    let stats = post.stats(&session).await.expect("stats");
    let stats_id = stats.id().expect("stats id");
    assert_eq!(fixture.store.len(EntityKind::Stats), 1);

    post.delete(&session, true).await.expect("delete");

    assert_eq!(fixture.store.len(EntityKind::Stats), 0);
    assert_eq!(fixture.store.len(EntityKind::Post), 0);
    assert!(session.get_by_id::<PostRecord>(id).await.expect("lookup").is_none());
    assert!(
        session
            .get_by_id::<StatsRecord>(stats_id)
            .await
            .expect("lookup")
            .is_none()
    );
}

#[test]
fn encoded_lists_round_trip_under_both_policies() {
    let ordered = ["3", "1", "2"];
    assert_eq!(encoded::decode(&encoded::encode(ordered)), ordered);

    let mut set = encoded::decode(&encoded::encode_set(["b", "a", "b", "c"]));
    set.sort();
    assert_eq!(set, ["a", "b", "c"]);
    assert!(encoded::decode("").is_empty());
}

#[tokio::test]
async fn stats_are_created_once_and_bound() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let post = saved_post(&session, "counted").await;

    let first = post.stats(&session).await.expect("stats");
    let second = post.stats(&session).await.expect("stats");
    assert!(first.ptr_eq(&second));
    assert_eq!(fixture.store.len(EntityKind::Stats), 1);

    let stats_id = first.id().expect("stats id");
    assert_eq!(post.with(|record| record.stats_id), Some(stats_id));

    let stored = fixture
        .store
        .fetch(EntityKind::Post, post.id().expect("id"))
        .await
        .expect("fetch")
        .expect("stored");
    assert_eq!(stored["stats_id"], stats_id);
}

#[tokio::test]
async fn unsaved_record_has_no_statistics() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let draft = session.create(PostRecord::new(None, None, "draft", ""));
    let err = draft.stats(&session).await.expect_err("unsaved");
    assert!(matches!(err, SessionError::Domain(_)));
    assert_eq!(fixture.store.len(EntityKind::Stats), 0);
}

#[tokio::test]
async fn failed_commit_leaves_the_session_usable() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let post = saved_post(&session, "original").await;

    post.modify(|record| record.title = "lost".to_string());
    post.save(&session, false).await.expect("stage");
    fixture.store.fail_next_commit(RepoError::Timeout);
    let err = session.commit().await.expect_err("injected failure");
    assert!(err.is_commit_failure());
    assert_eq!(post.with(|record| record.title.clone()), "original");
    assert!(!session.unit_of_work().has_pending());

    post.modify(|record| record.title = "kept".to_string());
    post.save(&session, true).await.expect("retry");
    let stored = fixture
        .store
        .fetch(EntityKind::Post, post.id().expect("id"))
        .await
        .expect("fetch")
        .expect("stored");
    assert_eq!(stored["title"], "kept");
}

async fn stored_membership(store: &MemoryStore, tag_id: i64) -> (i64, Vec<String>) {
    let row = store
        .fetch(EntityKind::Tag, tag_id)
        .await
        .expect("fetch")
        .expect("stored");
    (
        row["post_count"].as_i64().unwrap_or_default(),
        encoded::decode(row["post_id_list"].as_str().unwrap_or_default()),
    )
}

#[tokio::test]
async fn tag_membership_changes_are_stored() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let tag = session.create(TagRecord::new("rust"));
    tag.save(&session, true).await.expect("save tag");
    let tag_id = tag.id().expect("id");

    assert!(tag.add_post_id(&session, 7, true).await.expect("add"));
    let before = stored_membership(&fixture.store, tag_id).await;
    assert_eq!(before, (1, vec!["7".to_string()]));

    assert!(tag.add_post_id(&session, 9, true).await.expect("add"));
    assert!(!tag.add_post_id(&session, 9, true).await.expect("add again"));
    assert_eq!(
        stored_membership(&fixture.store, tag_id).await,
        (2, vec!["7".to_string(), "9".to_string()])
    );

    assert!(tag.remove_post_id(&session, 9, true).await.expect("remove"));
    assert!(!tag.remove_post_id(&session, 9, true).await.expect("remove again"));
    assert_eq!(stored_membership(&fixture.store, tag_id).await, before);
    assert!(!session.unit_of_work().has_pending());
}

#[tokio::test]
async fn deleted_record_stays_gone_after_commit() {
    for remember in [true, false] {
        let fixture = Fixture::with_config(CacheConfig {
            cache_negative_lookups: remember,
        });
        let session = fixture.sessions.open();
        let post = saved_post(&session, "short-lived").await;
        let id = post.id().expect("id");
        session
            .get_by_id::<PostRecord>(id)
            .await
            .expect("lookup")
            .expect("cached");

        post.delete(&session, false).await.expect("stage delete");
        assert!(session.get_by_id::<PostRecord>(id).await.expect("lookup").is_none());
        assert!(
            session
                .query::<PostRecord>(&Query::new())
                .await
                .expect("query")
                .is_empty()
        );

        session.commit().await.expect("commit");
        assert_eq!(fixture.store.len(EntityKind::Post), 0);
        assert!(session.get_by_id::<PostRecord>(id).await.expect("lookup").is_none());
        assert_eq!(post.id(), Some(id));
    }
}

#[tokio::test]
async fn rolled_back_delete_keeps_the_record() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let post = saved_post(&session, "spared").await;
    let id = post.id().expect("id");

    post.delete(&session, false).await.expect("stage delete");
    assert!(session.get_by_id::<PostRecord>(id).await.expect("lookup").is_none());
    session.rollback().await;

    let found = session
        .get_by_id::<PostRecord>(id)
        .await
        .expect("lookup")
        .expect("still stored");
    assert!(found.ptr_eq(&post));
    assert_eq!(fixture.store.len(EntityKind::Post), 1);
}

/// Store that lets a competing writer insert a statistics row just before
/// the next statistics insert arrives.
struct RacingStore {
    inner: MemoryStore,
    rival: Mutex<Option<Row>>,
}

#[async_trait]
impl Store for RacingStore {
    async fn fetch(&self, kind: EntityKind, id: i64) -> Result<Option<Row>, RepoError> {
        self.inner.fetch(kind, id).await
    }

    async fn select(&self, kind: EntityKind, query: &Query) -> Result<Vec<Row>, RepoError> {
        self.inner.select(kind, query).await
    }

    async fn count(&self, kind: EntityKind, query: &Query) -> Result<u64, RepoError> {
        self.inner.count(kind, query).await
    }

    async fn apply(&self, batch: &[Mutation]) -> Result<AppliedBatch, RepoError> {
        let inserts_stats = batch.iter().any(|mutation| {
            matches!(
                mutation,
                Mutation::Insert {
                    kind: EntityKind::Stats,
                    ..
                }
            )
        });
        let rival = if inserts_stats {
            self.rival.lock().expect("rival").take()
        } else {
            None
        };
        if let Some(row) = rival {
            self.inner
                .apply(&[Mutation::Insert {
                    kind: EntityKind::Stats,
                    row,
                }])
                .await?;
        }
        self.inner.apply(batch).await
    }
}

#[tokio::test]
async fn losing_the_statistics_race_keeps_staged_writes() {
    let store = Arc::new(RacingStore {
        inner: MemoryStore::new(),
        rival: Mutex::new(None),
    });
    let sessions = SessionFactory::new(store.clone(), CacheConfig::default());
    let session = sessions.open();
    let post = saved_post(&session, "original").await;
    let id = post.id().expect("id");

    let rival = StatsRecord::for_target(EntityKind::Post, id, Some(true))
        .to_row()
        .expect("row");
    *store.rival.lock().expect("rival") = Some(rival);

    post.modify(|record| record.title = "edited".to_string());
    post.save(&session, false).await.expect("stage");
    let stats = post.stats(&session).await.expect("stats");

    let rows = store
        .inner
        .select(EntityKind::Stats, &Query::new())
        .await
        .expect("select");
    assert_eq!(rows.len(), 1);
    assert_eq!(stats.id(), rows[0]["id"].as_i64());

    let stored = store
        .inner
        .fetch(EntityKind::Post, id)
        .await
        .expect("fetch")
        .expect("stored");
    assert_eq!(stored["title"], "edited");
    assert_eq!(stored["stats_id"], rows[0]["id"]);
    assert!(!session.unit_of_work().has_pending());
}

#[tokio::test]
async fn records_from_a_closed_session_can_be_reattached() {
    let fixture = Fixture::new();
    let first = fixture.sessions.open();
    let post = saved_post(&first, "wanderer").await;
    let id = post.id().expect("id");

    let second = fixture.sessions.open();
    let err = second.unit_of_work().add(&post).expect_err("still owned");
    assert!(matches!(err, SessionError::ForeignSession { .. }));

    drop(first);
    second.unit_of_work().reattach(&post).expect("reattach");
    let found = second
        .get_by_id::<PostRecord>(id)
        .await
        .expect("lookup")
        .expect("exists");
    assert!(found.ptr_eq(&post));
}

#[tokio::test]
async fn merge_returns_the_live_instance() {
    let fixture = Fixture::new();
    let id = {
        let session = fixture.sessions.open();
        saved_post(&session, "stale").await.id().expect("id")
    };
    let stale = {
        let session = fixture.sessions.open();
        session
            .get_by_id::<PostRecord>(id)
            .await
            .expect("lookup")
            .expect("exists")
    };

    let session = fixture.sessions.open();
    let live = session
        .get_by_id::<PostRecord>(id)
        .await
        .expect("lookup")
        .expect("exists");
    let merged = session.unit_of_work().merge(&stale).await.expect("merge");
    assert!(merged.ptr_eq(&live));
    assert!(!merged.ptr_eq(&stale));
}

#[tokio::test]
async fn concurrent_sessions_share_one_statistics_record() {
    let fixture = Fixture::new();
    let id = {
        let session = fixture.sessions.open();
        saved_post(&session, "popular").await.id().expect("id")
    };

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let sessions = fixture.sessions.clone();
        tasks.push(tokio::spawn(async move {
            let session = sessions.open();
            let post = session
                .get_by_id::<PostRecord>(id)
                .await?
                .expect("post exists");
            let stats = post.stats(&session).await?;
            stats
                .increase(&session, StatCounter::View, 1, true)
                .await?;
            Ok::<_, SessionError>(stats.id())
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.expect("join").expect("stats"));
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(fixture.store.len(EntityKind::Stats), 1);

    let rows = fixture
        .store
        .select(EntityKind::Stats, &Query::new().eq("target_id", id))
        .await
        .expect("select");
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn users_and_posts_flow_through_one_session() {
    let fixture = Fixture::new();
    let session = fixture.sessions.open();
    let author = users::create_user(&session, "flow@example.com", "pw", None, UserRole::User, true)
        .await
        .expect("user");
    let post = posts::create_post(&session, &author, None, "Flow", "", ["one"])
        .await
        .expect("post");
    session.close();

    let session = fixture.sessions.open();
    let reloaded = session
        .get_by_id::<PostRecord>(post.id().expect("id"))
        .await
        .expect("lookup")
        .expect("exists");
    assert!(!reloaded.ptr_eq(&post));
    let author = reloaded
        .author(&session)
        .await
        .expect("author")
        .expect("set");
    assert_eq!(author.with(|record| record.nickname.clone()), "flow");
}
