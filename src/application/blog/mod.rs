//! Entity-specific operations layered on the generic session contract.
//!
//! Relationship lookups are inherent methods on the record handles
//! (`post.author(&session)`), while listing and bootstrap operations are free
//! functions taking the request [`Session`].

pub mod categories;
pub mod comments;
pub mod photos;
pub mod posts;
pub mod site;
pub mod tags;
pub mod users;

use crate::application::repos::Query;
use crate::application::session::{Handle, Session, SessionError};
use crate::domain::{
    entities::StatsRecord,
    error::DomainError,
    model::{HasStats, Model},
    types::StatCounter,
};

/// Public targets of kind `T` with the highest `counter`, best first.
///
/// Targets whose row has disappeared are skipped.
pub(crate) async fn hot_targets<T: Model + HasStats>(
    session: &Session,
    count: u64,
    counter: StatCounter,
) -> Result<Vec<Handle<T>>, SessionError> {
    let query = Query::new()
        .eq("target_kind", T::KIND.as_str())
        .eq("public", true)
        .desc(counter.field())
        .limit(count);
    let ids: Vec<Option<i64>> = session
        .query::<StatsRecord>(&query)
        .await?
        .iter()
        .map(|stats| stats.with(|record| record.target_id))
        .collect();
    Ok(session
        .get_by_ids::<T>(&ids)
        .await?
        .into_iter()
        .flatten()
        .collect())
}

/// Id of a record that must already be persisted.
pub(crate) fn saved_id<T: Model>(handle: &Handle<T>, operation: &str) -> Result<i64, DomainError> {
    handle
        .id()
        .ok_or_else(|| DomainError::invariant(format!("`{}` must be saved before {operation}", T::KIND)))
}
