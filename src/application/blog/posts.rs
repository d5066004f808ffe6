use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::application::repos::Query;
use crate::application::session::{Handle, Session, SessionError};
use crate::domain::{
    encoded,
    entities::{
        CategoryRecord, CommentRecord, PhotoRecord, PostRecord, TagRecord, UserRecord,
        normalize_tag_name,
    },
    error::DomainError,
    model::Row,
    types::StatCounter,
};

use super::{categories, hot_targets, saved_id, tags};

impl Handle<PostRecord> {
    pub async fn author(&self, session: &Session) -> Result<Option<Handle<UserRecord>>, SessionError> {
        match self.with(|record| record.author_id) {
            Some(id) => session.get_by_id(id).await,
            None => Ok(None),
        }
    }

    pub async fn category(
        &self,
        session: &Session,
    ) -> Result<Option<Handle<CategoryRecord>>, SessionError> {
        match self.with(|record| record.category_id) {
            Some(id) => session.get_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Tag records named by this post, in stored order. Names without a
    /// record are skipped.
    pub async fn tags(&self, session: &Session) -> Result<Vec<Handle<TagRecord>>, SessionError> {
        let mut found = Vec::new();
        for name in self.with(PostRecord::tags) {
            if let Some(tag) = tags::get_tag_by_name(session, &name).await? {
                found.push(tag);
            }
        }
        Ok(found)
    }

    /// Replace this post's tags.
    ///
    /// Tag names are compared by normalized form and kept once each. Tags
    /// that lose the post drop it from their member list; new names create
    /// their tag on the fly.
    pub async fn set_tags<I, S>(&self, session: &Session, names: I, commit: bool) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let post_id = saved_id(self, "tagging")?;

        let mut wanted = Vec::new();
        let mut wanted_norm = HashSet::new();
        for name in names {
            for token in encoded::decode(name.as_ref()) {
                let token = token.trim().to_string();
                if wanted_norm.insert(normalize_tag_name(&token)) {
                    wanted.push(token);
                }
            }
        }

        for name in self.with(PostRecord::tags) {
            if wanted_norm.contains(&normalize_tag_name(&name)) {
                continue;
            }
            if let Some(tag) = tags::get_tag_by_name(session, &name).await? {
                tag.remove_post_id(session, post_id, false).await?;
            }
        }

        for name in &wanted {
            let tag = tags::get_or_create(session, name, false).await?;
            tag.add_post_id(session, post_id, false).await?;
        }

        debug!(
            target = "scriptorium::blog::posts",
            post = post_id,
            tags = wanted.len(),
            "tags replaced"
        );
        self.modify(|record| record.tag_list = encoded::encode_set(&wanted));
        self.save(session, commit).await
    }

    pub async fn photos(&self, session: &Session) -> Result<Vec<Handle<PhotoRecord>>, SessionError> {
        let id = saved_id(self, "listing its photos")?;
        session
            .query(&Query::new().eq("post_id", id).asc("created_date"))
            .await
    }

    /// Comments in creation order.
    pub async fn comments(&self, session: &Session) -> Result<Vec<Handle<CommentRecord>>, SessionError> {
        let id = saved_id(self, "listing its comments")?;
        session
            .query(&Query::new().eq("post_id", id).asc("created_date"))
            .await
    }

    /// `to_dict` plus the author, category, photos and tag records.
    pub async fn detail(&self, session: &Session) -> Result<Row, SessionError> {
        let mut dict = self.to_dict(session).await?;

        let author = match self.author(session).await? {
            Some(author) => Value::Object(author.snapshot_dict()?),
            None => Value::Null,
        };
        let category = match self.category(session).await? {
            Some(category) => Value::Object(category.snapshot_dict()?),
            None => Value::Null,
        };
        let photos = self
            .photos(session)
            .await?
            .iter()
            .map(|photo| photo.snapshot_dict().map(Value::Object))
            .collect::<Result<Vec<_>, _>>()?;
        let tags = self
            .tags(session)
            .await?
            .iter()
            .map(|tag| tag.snapshot_dict().map(Value::Object))
            .collect::<Result<Vec<_>, _>>()?;

        dict.insert("author".to_string(), author);
        dict.insert("category".to_string(), category);
        dict.insert("photos".to_string(), Value::Array(photos));
        dict.insert("tags".to_string(), Value::Array(tags));
        Ok(dict)
    }
}

/// Publish a post by `author`, filed under `category` or the home category,
/// and count it on the author's and category's statistics.
pub async fn create_post<I, S>(
    session: &Session,
    author: &Handle<UserRecord>,
    category: Option<&Handle<CategoryRecord>>,
    title: &str,
    body: &str,
    tag_names: I,
) -> Result<Handle<PostRecord>, SessionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if title.trim().is_empty() {
        return Err(DomainError::validation("post title must not be empty").into());
    }
    let author_id = saved_id(author, "authoring posts")?;
    let category = match category {
        Some(category) => category.clone(),
        None => categories::default_category(session).await?,
    };
    let category_id = saved_id(&category, "filing posts")?;

    let post = session.create(PostRecord::new(
        Some(author_id),
        Some(category_id),
        title.trim(),
        body,
    ));
    post.save(session, true).await?;
    post.set_tags(session, tag_names, false).await?;

    author
        .stats(session)
        .await?
        .increase(session, StatCounter::Post, 1, false)
        .await?;
    category
        .stats(session)
        .await?
        .increase(session, StatCounter::Post, 1, false)
        .await?;
    session.commit().await?;
    Ok(post)
}

/// Public posts with the highest `counter`.
pub async fn hot_posts(
    session: &Session,
    count: u64,
    counter: StatCounter,
) -> Result<Vec<Handle<PostRecord>>, SessionError> {
    hot_targets(session, count, counter).await
}

/// Most recent public posts.
pub async fn latest_posts(session: &Session, count: u64) -> Result<Vec<Handle<PostRecord>>, SessionError> {
    session
        .query(&Query::new().eq("public", true).desc("post_date").limit(count))
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::blog::users::create_user;
    use crate::application::session::SessionFactory;
    use crate::cache::CacheConfig;
    use crate::domain::types::UserRole;
    use crate::infra::memory::MemoryStore;

    fn session() -> Session {
        SessionFactory::new(Arc::new(MemoryStore::new()), CacheConfig::default()).open()
    }

    async fn author(session: &Session) -> Handle<UserRecord> {
        create_user(session, "writer@example.com", "pw", None, UserRole::Owner, true)
            .await
            .expect("author")
    }

    fn tag_state(tag: &Handle<TagRecord>) -> (i64, Vec<String>) {
        tag.with(|record| (record.post_count, record.post_ids()))
    }

    #[tokio::test]
    async fn create_post_files_counts_and_tags() {
        let session = session();
        let writer = author(&session).await;
        let post = create_post(&session, &writer, None, "Hello", "body", ["Rust", "rust", "Async"])
            .await
            .expect("create post");

        assert_eq!(post.with(PostRecord::tags), vec!["Rust", "Async"]);
        let category = post.category(&session).await.expect("category").expect("home");
        assert!(category.with(CategoryRecord::is_home));
        assert!(post.author(&session).await.expect("author").expect("set").ptr_eq(&writer));

        let writer_stats = writer.stats(&session).await.expect("stats");
        assert_eq!(writer_stats.count(StatCounter::Post), 1);
        assert_eq!(
            category.stats(&session).await.expect("stats").count(StatCounter::Post),
            1
        );

        let tags = post.tags(&session).await.expect("tags");
        assert_eq!(tags.len(), 2);
        let post_id = post.id().expect("id").to_string();
        for tag in &tags {
            assert_eq!(tag_state(tag), (1, vec![post_id.clone()]));
        }
    }

    #[tokio::test]
    async fn set_tags_moves_membership() {
        let session = session();
        let writer = author(&session).await;
        let post = create_post(&session, &writer, None, "Hello", "", ["a", "b"])
            .await
            .expect("create post");
        post.set_tags(&session, ["B", "c"], true).await.expect("retag");

        let a = tags::get_tag_by_name(&session, "a").await.expect("lookup").expect("a");
        let b = tags::get_tag_by_name(&session, "b").await.expect("lookup").expect("b");
        let c = tags::get_tag_by_name(&session, "c").await.expect("lookup").expect("c");
        let id = post.id().expect("id").to_string();
        assert_eq!(tag_state(&a), (0, vec![]));
        assert_eq!(tag_state(&b), (1, vec![id.clone()]));
        assert_eq!(tag_state(&c), (1, vec![id]));
        assert_eq!(post.with(PostRecord::tags), vec!["B", "c"]);
    }

    #[tokio::test]
    async fn hot_and_latest_skip_private_posts() {
        let session = session();
        let writer = author(&session).await;
        let quiet = create_post(&session, &writer, None, "quiet", "", Vec::<String>::new())
            .await
            .expect("post");
        let loud = create_post(&session, &writer, None, "loud", "", Vec::<String>::new())
            .await
            .expect("post");
        let secret = create_post(&session, &writer, None, "secret", "", Vec::<String>::new())
            .await
            .expect("post");

        for (post, views) in [(&quiet, 1), (&loud, 5), (&secret, 9)] {
            post.stats(&session)
                .await
                .expect("stats")
                .increase(&session, StatCounter::View, views, true)
                .await
                .expect("views");
        }
        let mut private = Row::new();
        private.insert("public".to_string(), false.into());
        assert!(secret.update(&session, private, true).await.expect("hide"));

        let hot = hot_posts(&session, 10, StatCounter::View).await.expect("hot");
        let titles: Vec<String> = hot
            .iter()
            .map(|post| post.with(|record| record.title.clone()))
            .collect();
        assert_eq!(titles, vec!["loud", "quiet"]);

        let latest = latest_posts(&session, 10).await.expect("latest");
        assert_eq!(latest.len(), 2);
    }

    #[tokio::test]
    async fn detail_embeds_relations() {
        let session = session();
        let writer = author(&session).await;
        let post = create_post(&session, &writer, None, "Hello", "", ["x"])
            .await
            .expect("post");
        let mut photo = PhotoRecord::new("/p.jpg", "p.jpg", "a photo");
        photo.post_id = post.id();
        session.create(photo).save(&session, true).await.expect("photo");

        let detail = post.detail(&session).await.expect("detail");
        assert_eq!(detail["author"]["nickname"], "writer");
        assert_eq!(detail["category"]["url"], "");
        assert_eq!(detail["photos"].as_array().map(Vec::len), Some(1));
        assert_eq!(detail["tags"][0]["name"], "x");
        assert!(!detail.contains_key("stats"));
    }
}
