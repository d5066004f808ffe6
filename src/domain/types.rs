//! Shared domain enumerations aligned with persisted document values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable type tag for every persisted record type.
///
/// The tag is part of identity keys and of the `(target_kind, target_id)` pair
/// stored on statistics records, so it must never change once data exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Post,
    Category,
    Comment,
    Photo,
    Tag,
    Stats,
    Settings,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::User,
        EntityKind::Post,
        EntityKind::Category,
        EntityKind::Comment,
        EntityKind::Photo,
        EntityKind::Tag,
        EntityKind::Stats,
        EntityKind::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Post => "post",
            EntityKind::Category => "category",
            EntityKind::Comment => "comment",
            EntityKind::Photo => "photo",
            EntityKind::Tag => "tag",
            EntityKind::Stats => "stats",
            EntityKind::Settings => "settings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for EntityKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(EntityKind::User),
            "post" => Ok(EntityKind::Post),
            "category" => Ok(EntityKind::Category),
            "comment" => Ok(EntityKind::Comment),
            "photo" => Ok(EntityKind::Photo),
            "tag" => Ok(EntityKind::Tag),
            "stats" => Ok(EntityKind::Stats),
            "settings" => Ok(EntityKind::Settings),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Owner,
    Admin,
    #[default]
    User,
}

/// Post ordering inside a category, by post date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryTemplate {
    #[default]
    Blog,
    /// Renders `content` instead of a post list.
    Text,
    Photo,
}

/// Counter columns of a statistics record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatCounter {
    #[default]
    View,
    Share,
    Like,
    Unlike,
    Post,
    Photo,
    Comment,
}

impl StatCounter {
    /// Field name of the counter inside a stats document.
    pub fn field(self) -> &'static str {
        match self {
            StatCounter::View => "view_count",
            StatCounter::Share => "share_count",
            StatCounter::Like => "like_count",
            StatCounter::Unlike => "unlike_count",
            StatCounter::Post => "post_count",
            StatCounter::Photo => "photo_count",
            StatCounter::Comment => "comment_count",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::try_from(kind.as_str()), Ok(kind));
            let json = serde_json::to_value(kind).expect("serialize kind");
            assert_eq!(json, serde_json::Value::String(kind.as_str().to_string()));
        }
        assert!(EntityKind::try_from("Post").is_err());
    }
}
