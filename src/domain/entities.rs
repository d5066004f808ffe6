//! Domain entities mirrored from persistent storage.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::domain::{
    model::{FieldManifest, HasStats, Model, Row},
    types::{CategoryTemplate, EntityKind, SortOrder, UserRole},
};

/// Current time truncated to whole seconds, the precision timestamps are stored with.
pub fn timestamp_now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now - Duration::nanoseconds(i64::from(now.nanosecond()))
}

macro_rules! impl_identity {
    () => {
        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }
    };
}

macro_rules! impl_has_stats {
    ($record:ty) => {
        impl HasStats for $record {
            fn stats_id(&self) -> Option<i64> {
                self.stats_id
            }

            fn set_stats_id(&mut self, id: i64) {
                self.stats_id = Some(id);
            }
        }
    };
    ($record:ty, visibility = $field:ident) => {
        impl HasStats for $record {
            fn stats_id(&self) -> Option<i64> {
                self.stats_id
            }

            fn set_stats_id(&mut self, id: i64) {
                self.stats_id = Some(id);
            }

            fn visibility(&self) -> Option<bool> {
                Some(self.$field)
            }
        }
    };
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Option<i64>,
    pub email: String,
    /// Hex SHA-256 digest, never the clear-text password.
    pub password: String,
    pub nickname: String,
    pub active: bool,
    pub avatar: String,
    pub role: UserRole,
    #[serde(with = "time::serde::timestamp")]
    pub joined_date: OffsetDateTime,
    pub stats_id: Option<i64>,
}

static USER_MANIFEST: Lazy<FieldManifest> = Lazy::new(|| {
    FieldManifest::new(
        EntityKind::User,
        &[
            "id",
            "email",
            "password",
            "nickname",
            "active",
            "avatar",
            "role",
            "joined_date",
            "stats_id",
        ],
        &["password", "email", "stats_id"],
    )
});

impl UserRecord {
    /// A new account; the nickname falls back to the e-mail's local part.
    pub fn new(email: impl Into<String>, nickname: Option<String>, role: UserRole) -> Self {
        let email = email.into();
        let nickname = nickname
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        Self {
            id: None,
            email,
            password: String::new(),
            nickname,
            active: true,
            avatar: String::new(),
            role,
            joined_date: timestamp_now(),
            stats_id: None,
        }
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = password_digest(password);
    }

    pub fn check_password(&self, password: &str) -> bool {
        !self.password.is_empty() && self.password == password_digest(password)
    }

    /// Explicit avatar, or a Gravatar URL derived from the normalized e-mail.
    pub fn avatar_url(&self) -> String {
        if !self.avatar.is_empty() {
            return self.avatar.clone();
        }
        let normalized = self.email.trim().to_lowercase();
        let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
        format!("https://www.gravatar.com/avatar/{digest}?s=64")
    }
}

pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

impl Model for UserRecord {
    const KIND: EntityKind = EntityKind::User;

    fn manifest() -> &'static FieldManifest {
        &USER_MANIFEST
    }

    impl_identity!();

    fn stats_binding(&self) -> Option<&dyn HasStats> {
        Some(self)
    }

    fn decorate(&self, dict: &mut Row) {
        dict.insert("avatar_url".to_string(), self.avatar_url().into());
    }
}

impl_has_stats!(UserRecord);

// ============================================================================
// Categories
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: Option<i64>,
    /// Path segment; the empty string is the home category.
    pub url: String,
    pub name: String,
    pub sort: i64,
    pub posts_per_page: i64,
    pub order: SortOrder,
    pub template: CategoryTemplate,
    pub content: Option<String>,
    pub stats_id: Option<i64>,
}

static CATEGORY_MANIFEST: Lazy<FieldManifest> = Lazy::new(|| {
    FieldManifest::new(
        EntityKind::Category,
        &[
            "id",
            "url",
            "name",
            "sort",
            "posts_per_page",
            "order",
            "template",
            "content",
            "stats_id",
        ],
        &["stats_id"],
    )
});

impl CategoryRecord {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            name: name.into(),
            sort: 0,
            posts_per_page: 5,
            order: SortOrder::default(),
            template: CategoryTemplate::default(),
            content: None,
            stats_id: None,
        }
    }

    pub fn is_home(&self) -> bool {
        self.url.is_empty()
    }
}

impl Model for CategoryRecord {
    const KIND: EntityKind = EntityKind::Category;

    fn manifest() -> &'static FieldManifest {
        &CATEGORY_MANIFEST
    }

    impl_identity!();

    fn stats_binding(&self) -> Option<&dyn HasStats> {
        Some(self)
    }
}

impl_has_stats!(CategoryRecord);

// ============================================================================
// Posts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: Option<i64>,
    pub title: String,
    pub body: String,
    pub public: bool,
    pub sticky: bool,
    #[serde(with = "time::serde::timestamp")]
    pub post_date: OffsetDateTime,
    #[serde(with = "time::serde::timestamp::option")]
    pub updated_date: Option<OffsetDateTime>,
    pub category_id: Option<i64>,
    pub author_id: Option<i64>,
    pub stats_id: Option<i64>,
    /// Encoded tag names (set policy).
    pub tag_list: String,
}

static POST_MANIFEST: Lazy<FieldManifest> = Lazy::new(|| {
    FieldManifest::new(
        EntityKind::Post,
        &[
            "id",
            "title",
            "body",
            "public",
            "sticky",
            "post_date",
            "updated_date",
            "category_id",
            "author_id",
            "stats_id",
            "tag_list",
        ],
        &["stats_id", "tag_list"],
    )
});

impl PostRecord {
    pub fn new(
        author_id: Option<i64>,
        category_id: Option<i64>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = timestamp_now();
        Self {
            id: None,
            title: title.into(),
            body: body.into(),
            public: true,
            sticky: false,
            post_date: now,
            updated_date: Some(now),
            category_id,
            author_id,
            stats_id: None,
            tag_list: String::new(),
        }
    }

    pub fn tags(&self) -> Vec<String> {
        crate::domain::encoded::decode(&self.tag_list)
    }
}

impl Model for PostRecord {
    const KIND: EntityKind = EntityKind::Post;

    fn manifest() -> &'static FieldManifest {
        &POST_MANIFEST
    }

    impl_identity!();

    fn stats_binding(&self) -> Option<&dyn HasStats> {
        Some(self)
    }

    fn decorate(&self, dict: &mut Row) {
        dict.insert("tags".to_string(), self.tags().into());
    }

    fn before_save(&mut self) {
        if self.id.is_some() {
            self.updated_date = Some(timestamp_now());
        }
    }
}

impl_has_stats!(PostRecord, visibility = public);

// ============================================================================
// Comments
// ============================================================================

pub const ROOT_COMMENT_PARENT: i64 = -1;
pub const DELETED_COMMENT_TEXT: &str = "Comment Deleted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: Option<i64>,
    #[serde(with = "time::serde::timestamp")]
    pub created_date: OffsetDateTime,
    pub author: String,
    pub content: String,
    pub deleted: bool,
    pub parent_id: i64,
    pub post_id: Option<i64>,
    pub stats_id: Option<i64>,
}

static COMMENT_MANIFEST: Lazy<FieldManifest> = Lazy::new(|| {
    FieldManifest::new(
        EntityKind::Comment,
        &[
            "id",
            "created_date",
            "author",
            "content",
            "deleted",
            "parent_id",
            "post_id",
            "stats_id",
        ],
        &["stats_id"],
    )
});

impl CommentRecord {
    pub fn new(
        author: impl Into<String>,
        content: impl Into<String>,
        post_id: i64,
        parent_id: Option<i64>,
    ) -> Self {
        Self {
            id: None,
            created_date: timestamp_now(),
            author: author.into(),
            content: content.into(),
            deleted: false,
            parent_id: parent_id.unwrap_or(ROOT_COMMENT_PARENT),
            post_id: Some(post_id),
            stats_id: None,
        }
    }
}

impl Model for CommentRecord {
    const KIND: EntityKind = EntityKind::Comment;

    fn manifest() -> &'static FieldManifest {
        &COMMENT_MANIFEST
    }

    impl_identity!();

    fn stats_binding(&self) -> Option<&dyn HasStats> {
        Some(self)
    }

    fn decorate(&self, dict: &mut Row) {
        if self.deleted {
            dict.insert("content".to_string(), DELETED_COMMENT_TEXT.into());
        }
    }
}

impl_has_stats!(CommentRecord);

// ============================================================================
// Photos
// ============================================================================

pub const DEFAULT_PHOTO_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: Option<i64>,
    #[serde(with = "time::serde::timestamp")]
    pub created_date: OffsetDateTime,
    pub url: String,
    pub url_thumb: String,
    pub mime: String,
    pub alt: String,
    pub real_file: String,
    pub real_file_thumb: String,
    pub public: bool,
    pub post_id: Option<i64>,
    pub stats_id: Option<i64>,
}

static PHOTO_MANIFEST: Lazy<FieldManifest> = Lazy::new(|| {
    FieldManifest::new(
        EntityKind::Photo,
        &[
            "id",
            "created_date",
            "url",
            "url_thumb",
            "mime",
            "alt",
            "real_file",
            "real_file_thumb",
            "public",
            "post_id",
            "stats_id",
        ],
        &["stats_id"],
    )
});

impl PhotoRecord {
    pub fn new(url: impl Into<String>, real_file: impl Into<String>, alt: impl Into<String>) -> Self {
        Self {
            id: None,
            created_date: timestamp_now(),
            url: url.into(),
            url_thumb: String::new(),
            mime: DEFAULT_PHOTO_MIME.to_string(),
            alt: alt.into(),
            real_file: real_file.into(),
            real_file_thumb: String::new(),
            public: true,
            post_id: None,
            stats_id: None,
        }
    }
}

impl Model for PhotoRecord {
    const KIND: EntityKind = EntityKind::Photo;

    fn manifest() -> &'static FieldManifest {
        &PHOTO_MANIFEST
    }

    impl_identity!();

    fn stats_binding(&self) -> Option<&dyn HasStats> {
        Some(self)
    }
}

impl_has_stats!(PhotoRecord, visibility = public);

// ============================================================================
// Tags
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: Option<i64>,
    #[serde(with = "time::serde::timestamp")]
    pub created_date: OffsetDateTime,
    /// Lookup key: trimmed, lowercased name.
    pub norm_name: String,
    pub name: String,
    pub post_count: i64,
    /// Encoded member post ids (list policy).
    pub post_id_list: String,
    pub stats_id: Option<i64>,
}

static TAG_MANIFEST: Lazy<FieldManifest> = Lazy::new(|| {
    FieldManifest::new(
        EntityKind::Tag,
        &[
            "id",
            "created_date",
            "norm_name",
            "name",
            "post_count",
            "post_id_list",
            "stats_id",
        ],
        &["norm_name", "post_id_list", "stats_id"],
    )
});

pub fn normalize_tag_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl TagRecord {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            created_date: timestamp_now(),
            norm_name: normalize_tag_name(name),
            name: name.trim().to_string(),
            post_count: 0,
            post_id_list: String::new(),
            stats_id: None,
        }
    }

    pub fn post_ids(&self) -> Vec<String> {
        crate::domain::encoded::decode(&self.post_id_list)
    }

    /// Adds a member id and bumps the count. Returns whether anything changed.
    pub fn add_post_id(&mut self, post_id: &str) -> bool {
        let changed = crate::domain::encoded::append(&mut self.post_id_list, post_id);
        if changed {
            self.post_count += 1;
        }
        changed
    }

    /// Removes a member id and lowers the count. Returns whether anything changed.
    pub fn remove_post_id(&mut self, post_id: &str) -> bool {
        let changed = crate::domain::encoded::remove(&mut self.post_id_list, post_id);
        if changed {
            self.post_count -= 1;
        }
        changed
    }
}

impl Model for TagRecord {
    const KIND: EntityKind = EntityKind::Tag;

    fn manifest() -> &'static FieldManifest {
        &TAG_MANIFEST
    }

    impl_identity!();

    fn stats_binding(&self) -> Option<&dyn HasStats> {
        Some(self)
    }
}

impl_has_stats!(TagRecord);

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub id: Option<i64>,
    pub target_kind: EntityKind,
    pub target_id: Option<i64>,
    pub public: bool,
    pub view_count: i64,
    pub share_count: i64,
    pub like_count: i64,
    pub unlike_count: i64,
    pub post_count: i64,
    pub photo_count: i64,
    pub comment_count: i64,
}

static STATS_MANIFEST: Lazy<FieldManifest> = Lazy::new(|| {
    FieldManifest::new(
        EntityKind::Stats,
        &[
            "id",
            "target_kind",
            "target_id",
            "public",
            "view_count",
            "share_count",
            "like_count",
            "unlike_count",
            "post_count",
            "photo_count",
            "comment_count",
        ],
        &[],
    )
});

impl StatsRecord {
    pub fn for_target(kind: EntityKind, id: i64, public: Option<bool>) -> Self {
        Self {
            id: None,
            target_kind: kind,
            target_id: Some(id),
            public: public.unwrap_or(true),
            view_count: 0,
            share_count: 0,
            like_count: 0,
            unlike_count: 0,
            post_count: 0,
            photo_count: 0,
            comment_count: 0,
        }
    }

    pub fn counter_mut(&mut self, counter: crate::domain::types::StatCounter) -> &mut i64 {
        use crate::domain::types::StatCounter;
        match counter {
            StatCounter::View => &mut self.view_count,
            StatCounter::Share => &mut self.share_count,
            StatCounter::Like => &mut self.like_count,
            StatCounter::Unlike => &mut self.unlike_count,
            StatCounter::Post => &mut self.post_count,
            StatCounter::Photo => &mut self.photo_count,
            StatCounter::Comment => &mut self.comment_count,
        }
    }
}

impl Model for StatsRecord {
    const KIND: EntityKind = EntityKind::Stats;

    fn manifest() -> &'static FieldManifest {
        &STATS_MANIFEST
    }

    impl_identity!();
}

// ============================================================================
// Site settings
// ============================================================================

/// Bump when the stored document shape changes; stale settings trigger re-initialization.
pub const SITE_SETTINGS_VERSION: f64 = 1.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSettingsRecord {
    pub id: Option<i64>,
    pub version: f64,
    pub title: String,
    pub subtitle: String,
    pub copyright: String,
    pub ga_tracking_id: Option<String>,
    pub owner: String,
    pub inited: bool,
}

static SETTINGS_MANIFEST: Lazy<FieldManifest> = Lazy::new(|| {
    FieldManifest::new(
        EntityKind::Settings,
        &[
            "id",
            "version",
            "title",
            "subtitle",
            "copyright",
            "ga_tracking_id",
            "owner",
            "inited",
        ],
        &[],
    )
});

impl SiteSettingsRecord {
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: None,
            version: SITE_SETTINGS_VERSION,
            title: title.into(),
            subtitle: subtitle.into(),
            copyright: String::new(),
            ga_tracking_id: None,
            owner: owner.into(),
            inited: false,
        }
    }

    pub fn is_current(&self) -> bool {
        self.inited && self.version >= SITE_SETTINGS_VERSION
    }
}

impl Model for SiteSettingsRecord {
    const KIND: EntityKind = EntityKind::Settings;

    fn manifest() -> &'static FieldManifest {
        &SETTINGS_MANIFEST
    }

    impl_identity!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialized_keys<T: Model>(record: &T) -> Vec<String> {
        let mut keys: Vec<String> = record.to_row().expect("row").keys().cloned().collect();
        keys.sort();
        keys
    }

    fn declared<T: Model>() -> Vec<String> {
        let mut fields: Vec<String> = T::manifest().fields().iter().map(|f| f.to_string()).collect();
        fields.sort();
        fields
    }

    #[test]
    fn manifests_match_serialized_documents() {
        let user = UserRecord::new("owner@example.com", None, UserRole::Owner);
        assert_eq!(serialized_keys(&user), declared::<UserRecord>());

        let category = CategoryRecord::new("notes", "Notes");
        assert_eq!(serialized_keys(&category), declared::<CategoryRecord>());

        let post = PostRecord::new(Some(1), Some(2), "Title", "Body");
        assert_eq!(serialized_keys(&post), declared::<PostRecord>());

        let comment = CommentRecord::new("anon", "hi", 3, None);
        assert_eq!(serialized_keys(&comment), declared::<CommentRecord>());

        let photo = PhotoRecord::new("/u/a.png", "a.png", "a");
        assert_eq!(serialized_keys(&photo), declared::<PhotoRecord>());

        let tag = TagRecord::new("Rust");
        assert_eq!(serialized_keys(&tag), declared::<TagRecord>());

        let stats = StatsRecord::for_target(EntityKind::Post, 1, None);
        assert_eq!(serialized_keys(&stats), declared::<StatsRecord>());

        let settings = SiteSettingsRecord::new("Blog", "", "owner@example.com");
        assert_eq!(serialized_keys(&settings), declared::<SiteSettingsRecord>());
    }

    #[test]
    fn nickname_defaults_to_local_part() {
        let user = UserRecord::new("gully@example.com", None, UserRole::User);
        assert_eq!(user.nickname, "gully");

        let named = UserRecord::new("gully@example.com", Some("GC".into()), UserRole::User);
        assert_eq!(named.nickname, "GC");
    }

    #[test]
    fn password_is_stored_as_digest() {
        let mut user = UserRecord::new("a@example.com", None, UserRole::User);
        user.set_password("secret");
        assert_ne!(user.password, "secret");
        assert!(user.check_password("secret"));
        assert!(!user.check_password("other"));
    }

    #[test]
    fn avatar_url_prefers_explicit_avatar() {
        let mut user = UserRecord::new(" A@Example.com ", None, UserRole::User);
        let derived = user.avatar_url();
        assert!(derived.starts_with("https://www.gravatar.com/avatar/"));
        assert_eq!(
            derived,
            UserRecord::new("a@example.com", None, UserRole::User).avatar_url()
        );

        user.avatar = "/static/me.png".to_string();
        assert_eq!(user.avatar_url(), "/static/me.png");
    }

    #[test]
    fn tag_membership_keeps_count_in_step() {
        let mut tag = TagRecord::new("  Rust ");
        assert_eq!(tag.norm_name, "rust");
        assert_eq!(tag.name, "Rust");

        assert!(tag.add_post_id("7"));
        assert!(!tag.add_post_id("7"));
        assert!(tag.add_post_id("9"));
        assert_eq!(tag.post_count, 2);
        assert_eq!(tag.post_ids(), vec!["7", "9"]);

        assert!(tag.remove_post_id("7"));
        assert!(!tag.remove_post_id("7"));
        assert_eq!(tag.post_count, 1);
        assert_eq!(tag.post_id_list, "9");
    }

    #[test]
    fn records_survive_document_round_trip() {
        let mut post = PostRecord::new(Some(1), None, "Hello", "World");
        post.set_id(10);
        post.tag_list = "a,b".to_string();
        let row = post.to_row().expect("row");
        assert_eq!(row.get("id"), Some(&serde_json::json!(10)));
        let decoded = PostRecord::from_row(row).expect("decode");
        assert_eq!(decoded, post);
    }

    #[test]
    fn deleted_comment_content_is_masked() {
        let mut comment = CommentRecord::new("anon", "spam", 1, None);
        comment.deleted = true;
        let mut dict = Row::new();
        comment.decorate(&mut dict);
        assert_eq!(dict.get("content"), Some(&serde_json::json!(DELETED_COMMENT_TEXT)));
    }
}
