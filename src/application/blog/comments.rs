use crate::application::session::{Handle, Session, SessionError};
use crate::domain::{
    entities::{CommentRecord, PostRecord},
    error::DomainError,
    types::StatCounter,
};

use super::saved_id;

impl Handle<CommentRecord> {
    pub async fn post(&self, session: &Session) -> Result<Option<Handle<PostRecord>>, SessionError> {
        match self.with(|record| record.post_id) {
            Some(id) => session.get_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Soft delete: the row stays so replies keep their parent, and
    /// `to_dict` masks the content from then on.
    pub async fn retract(&self, session: &Session) -> Result<(), SessionError> {
        if self.with(|record| record.deleted) {
            return Ok(());
        }
        self.modify(|record| record.deleted = true);
        self.save(session, false).await?;
        if let Some(post) = self.post(session).await? {
            post.stats(session)
                .await?
                .decrease(session, StatCounter::Comment, 1, false)
                .await?;
        }
        session.commit().await
    }
}

/// Comment on `post`, optionally replying to `parent` on the same post.
pub async fn add_comment(
    session: &Session,
    post: &Handle<PostRecord>,
    author: &str,
    content: &str,
    parent: Option<&Handle<CommentRecord>>,
) -> Result<Handle<CommentRecord>, SessionError> {
    let post_id = saved_id(post, "receiving comments")?;
    if content.trim().is_empty() {
        return Err(DomainError::validation("comment must not be empty").into());
    }
    let parent_id = match parent {
        Some(parent) => {
            if parent.with(|record| record.post_id) != Some(post_id) {
                return Err(DomainError::validation("reply must target a comment on the same post").into());
            }
            Some(saved_id(parent, "receiving replies")?)
        }
        None => None,
    };

    let comment = session.create(CommentRecord::new(author.trim(), content, post_id, parent_id));
    comment.save(session, false).await?;
    post.stats(session)
        .await?
        .increase(session, StatCounter::Comment, 1, false)
        .await?;
    session.commit().await?;
    Ok(comment)
}
