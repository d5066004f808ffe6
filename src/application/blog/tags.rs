use crate::application::pagination::{PageRequest, Paginated, PaginationError};
use crate::application::repos::Query;
use crate::application::session::{Handle, Session, SessionError};
use crate::domain::{
    entities::{PostRecord, TagRecord, normalize_tag_name},
    error::DomainError,
};

/// Case-insensitive lookup through the normalized name.
pub async fn get_tag_by_name(
    session: &Session,
    name: &str,
) -> Result<Option<Handle<TagRecord>>, SessionError> {
    session
        .filter_one(Query::new().eq("norm_name", normalize_tag_name(name)))
        .await
}

pub async fn get_or_create(
    session: &Session,
    name: &str,
    commit: bool,
) -> Result<Handle<TagRecord>, SessionError> {
    if normalize_tag_name(name).is_empty() {
        return Err(DomainError::validation("tag name must not be empty").into());
    }
    if let Some(tag) = get_tag_by_name(session, name).await? {
        return Ok(tag);
    }
    let tag = session.create(TagRecord::new(name));
    tag.save(session, commit).await?;
    Ok(tag)
}

/// Tags with the most posts.
pub async fn hot_tags(session: &Session, count: u64) -> Result<Vec<Handle<TagRecord>>, SessionError> {
    session
        .query(
            &Query::new()
                .gt("post_count", 0)
                .desc("post_count")
                .limit(count),
        )
        .await
}

impl Handle<TagRecord> {
    /// Add a member post and persist the tag. Already a member: nothing is written.
    pub async fn add_post_id(
        &self,
        session: &Session,
        post_id: i64,
        commit: bool,
    ) -> Result<bool, SessionError> {
        let changed = self.modify(|record| record.add_post_id(&post_id.to_string()));
        if changed {
            self.save(session, commit).await?;
        }
        Ok(changed)
    }

    /// Drop a member post and persist the tag. Not a member: nothing is written.
    pub async fn remove_post_id(
        &self,
        session: &Session,
        post_id: i64,
        commit: bool,
    ) -> Result<bool, SessionError> {
        let changed = self.modify(|record| record.remove_post_id(&post_id.to_string()));
        if changed {
            self.save(session, commit).await?;
        }
        Ok(changed)
    }

    /// Public member posts, most recently tagged first.
    pub async fn posts(
        &self,
        session: &Session,
        page: u64,
        per_page: u64,
    ) -> Result<Paginated<Handle<PostRecord>>, SessionError> {
        let request = PageRequest::new(page, per_page)?;
        let ids: Vec<Option<i64>> = self
            .with(TagRecord::post_ids)
            .iter()
            .rev()
            .map(|id| id.parse::<i64>().ok())
            .collect();

        let visible: Vec<Handle<PostRecord>> = session
            .get_by_ids::<PostRecord>(&ids)
            .await?
            .into_iter()
            .flatten()
            .filter(|post| post.with(|record| record.public))
            .collect();

        let total = visible.len() as u64;
        let items: Vec<_> = visible
            .into_iter()
            .skip(usize::try_from(request.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(request.per_page).unwrap_or(usize::MAX))
            .collect();
        if items.is_empty() && request.page != 1 {
            return Err(PaginationError::OutOfRange { page }.into());
        }
        Ok(Paginated::new(items, request, total))
    }
}
