use crate::application::pagination::Paginated;
use crate::application::repos::{Direction, Query};
use crate::application::session::{Handle, Session, SessionError};
use crate::domain::{
    entities::{CategoryRecord, PostRecord},
    types::SortOrder,
};

use super::saved_id;

/// The home category lists every post regardless of its category.
pub const HOME_CATEGORY_URL: &str = "";
pub const HOME_CATEGORY_NAME: &str = "Home";

pub async fn get_by_url(
    session: &Session,
    url: &str,
) -> Result<Option<Handle<CategoryRecord>>, SessionError> {
    session.filter_one(Query::new().eq("url", url)).await
}

/// The home category, created on first use.
pub async fn default_category(session: &Session) -> Result<Handle<CategoryRecord>, SessionError> {
    if let Some(home) = get_by_url(session, HOME_CATEGORY_URL).await? {
        return Ok(home);
    }
    let home = session.create(CategoryRecord::new(HOME_CATEGORY_URL, HOME_CATEGORY_NAME));
    home.save(session, true).await?;
    Ok(home)
}

impl Handle<CategoryRecord> {
    /// Posts in this category, sticky posts first, then by post date in the
    /// category's order. `per_page` falls back to the category's own setting.
    pub async fn posts(
        &self,
        session: &Session,
        page: u64,
        per_page: Option<u64>,
        include_unpublished: bool,
    ) -> Result<Paginated<Handle<PostRecord>>, SessionError> {
        let (is_home, order, own_per_page) = self.with(|record| {
            (
                record.is_home(),
                record.order,
                u64::try_from(record.posts_per_page).unwrap_or(1).max(1),
            )
        });

        let mut query = Query::new();
        if !is_home {
            query = query.eq("category_id", saved_id(self, "listing its posts")?);
        }
        if !include_unpublished {
            query = query.eq("public", true);
        }
        let direction = match order {
            SortOrder::Asc => Direction::Asc,
            SortOrder::Desc => Direction::Desc,
        };
        let query = query.desc("sticky").order_by("post_date", direction);

        session
            .paginate(query, page, per_page.unwrap_or(own_per_page), true)
            .await
    }
}
