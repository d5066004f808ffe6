use tracing::info;

use crate::application::repos::Query;
use crate::application::session::{Handle, Session, SessionError};
use crate::config::SiteDefaults;
use crate::domain::{
    entities::{CategoryRecord, PostRecord, SITE_SETTINGS_VERSION, SiteSettingsRecord},
    types::UserRole,
};

use super::{categories, posts, users};

const WELCOME_TITLE: &str = "Hello, world";
const WELCOME_BODY: &str = "This is the first post. Edit or delete it, then start writing.";
const WELCOME_TAG: &str = "welcome";

pub async fn get_site_settings(
    session: &Session,
) -> Result<Option<Handle<SiteSettingsRecord>>, SessionError> {
    session.filter_one(Query::new().asc("id")).await
}

/// Every category in navigation order.
pub async fn categories(session: &Session) -> Result<Vec<Handle<CategoryRecord>>, SessionError> {
    session.query(&Query::new().asc("sort").asc("id")).await
}

/// First-run bootstrap. Does nothing when the stored settings are already
/// initialized at the current version; otherwise ensures the home category
/// and the owner account exist, adds a welcome post to a site without posts,
/// then marks the settings initialized.
///
/// Returns whether anything was initialized.
pub async fn init_site(session: &Session, defaults: &SiteDefaults) -> Result<bool, SessionError> {
    let existing = get_site_settings(session).await?;
    if existing
        .as_ref()
        .is_some_and(|settings| settings.with(SiteSettingsRecord::is_current))
    {
        return Ok(false);
    }

    let home = categories::default_category(session).await?;
    let owner = match users::get_user_by_email(session, &defaults.owner_email).await? {
        Some(owner) => owner,
        None => {
            users::create_user(
                session,
                &defaults.owner_email,
                &defaults.default_password,
                None,
                UserRole::Owner,
                true,
            )
            .await?
        }
    };
    if !session.check_exist::<PostRecord>(Query::new()).await? {
        posts::create_post(
            session,
            &owner,
            Some(&home),
            WELCOME_TITLE,
            WELCOME_BODY,
            [WELCOME_TAG],
        )
        .await?;
    }

    let settings = match existing {
        Some(settings) => settings,
        None => session.create(SiteSettingsRecord::new(
            defaults.title.clone(),
            defaults.subtitle.clone(),
            defaults.owner_email.clone(),
        )),
    };
    settings.modify(|record| {
        record.version = SITE_SETTINGS_VERSION;
        record.inited = true;
    });
    settings.save(session, true).await?;

    info!(
        target = "scriptorium::blog::site",
        owner = %defaults.owner_email,
        version = SITE_SETTINGS_VERSION,
        "site initialized"
    );
    Ok(true)
}
