use tracing::info;

use crate::application::repos::Query;
use crate::application::session::{Handle, Session, SessionError};
use crate::domain::{entities::UserRecord, error::DomainError, types::UserRole};

pub async fn get_user_by_email(
    session: &Session,
    email: &str,
) -> Result<Option<Handle<UserRecord>>, SessionError> {
    session
        .filter_one(Query::new().eq("email", email.trim()))
        .await
}

/// Register a user. The password is stored as a digest; the nickname
/// defaults to the local part of the e-mail address.
pub async fn create_user(
    session: &Session,
    email: &str,
    password: &str,
    nickname: Option<String>,
    role: UserRole,
    commit: bool,
) -> Result<Handle<UserRecord>, SessionError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(DomainError::validation(format!("`{email}` is not an e-mail address")).into());
    }
    if password.is_empty() {
        return Err(DomainError::validation("password must not be empty").into());
    }
    if get_user_by_email(session, email).await?.is_some() {
        return Err(DomainError::validation(format!("`{email}` is already registered")).into());
    }

    let mut record = UserRecord::new(email, nickname, role);
    record.set_password(password);
    let user = session.create(record);
    user.save(session, commit).await?;
    info!(
        target = "scriptorium::blog::users",
        email = %email,
        role = ?role,
        "user created"
    );
    Ok(user)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::session::SessionFactory;
    use crate::cache::CacheConfig;
    use crate::infra::memory::MemoryStore;

    fn session() -> Session {
        SessionFactory::new(Arc::new(MemoryStore::new()), CacheConfig::default()).open()
    }

    #[tokio::test]
    async fn create_user_hashes_password_and_rejects_duplicates() {
        let session = session();
        let user = create_user(&session, "ada@example.com", "secret", None, UserRole::User, true)
            .await
            .expect("create user");
        assert!(user.id().is_some());
        assert_eq!(user.with(|record| record.nickname.clone()), "ada");
        assert!(user.with(|record| record.check_password("secret")));
        assert_ne!(user.with(|record| record.password.clone()), "secret");

        let found = get_user_by_email(&session, " ada@example.com ")
            .await
            .expect("lookup")
            .expect("user exists");
        assert!(found.ptr_eq(&user));

        let err = create_user(&session, "ada@example.com", "other", None, UserRole::User, true)
            .await
            .expect_err("duplicate e-mail");
        assert!(matches!(err, SessionError::Domain(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn to_dict_hides_credentials() {
        let session = session();
        let user = create_user(&session, "bo@example.com", "pw", Some("Bo".into()), UserRole::Admin, true)
            .await
            .expect("create user");
        let dict = user.to_dict(&session).await.expect("to_dict");
        assert!(!dict.contains_key("password"));
        assert!(!dict.contains_key("email"));
        assert!(dict["avatar_url"].as_str().is_some_and(|url| url.contains("gravatar")));
    }
}
