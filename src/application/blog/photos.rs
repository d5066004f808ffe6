use crate::application::session::{Handle, Session, SessionError};
use crate::domain::{
    entities::{PhotoRecord, PostRecord},
    types::StatCounter,
};

use super::hot_targets;

impl Handle<PhotoRecord> {
    pub async fn post(&self, session: &Session) -> Result<Option<Handle<PostRecord>>, SessionError> {
        match self.with(|record| record.post_id) {
            Some(id) => session.get_by_id(id).await,
            None => Ok(None),
        }
    }
}

/// Public photos with the highest `counter`.
pub async fn hot_photos(
    session: &Session,
    count: u64,
    counter: StatCounter,
) -> Result<Vec<Handle<PhotoRecord>>, SessionError> {
    hot_targets(session, count, counter).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::session::SessionFactory;
    use crate::cache::CacheConfig;
    use crate::infra::memory::MemoryStore;

    #[tokio::test]
    async fn hot_photos_follow_likes() {
        let session = SessionFactory::new(Arc::new(MemoryStore::new()), CacheConfig::default()).open();
        let post = session.create(PostRecord::new(None, None, "album", ""));
        post.save(&session, true).await.expect("post");

        let mut photos = Vec::new();
        for (name, likes) in [("a", 2), ("b", 7), ("c", 0)] {
            let mut record = PhotoRecord::new(format!("/{name}.jpg"), format!("{name}.jpg"), name);
            record.post_id = post.id();
            let photo = session.create(record);
            photo.save(&session, true).await.expect("photo");
            photo
                .stats(&session)
                .await
                .expect("stats")
                .set(&session, StatCounter::Like, likes, true)
                .await
                .expect("likes");
            photos.push(photo);
        }

        let hot = hot_photos(&session, 2, StatCounter::Like).await.expect("hot");
        assert_eq!(hot.len(), 2);
        assert!(hot[0].ptr_eq(&photos[1]));
        assert!(hot[1].ptr_eq(&photos[0]));
        assert!(hot[0].post(&session).await.expect("post").expect("set").ptr_eq(&post));
        assert_eq!(post.photos(&session).await.expect("photos").len(), 3);
    }
}
