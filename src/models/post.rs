use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Model;
use crate::geo::GeoPoint;

/// A stored upload referenced by a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Relative path, `uploads/<name>`.
    pub path: String,
    /// Fully-qualified URL for clients.
    pub url: String,
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(rename = "_id")]
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub shares_count: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Model for Post {
    const COLLECTION: &'static str = "posts";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: String,
    pub tenant_id: String,
    pub post_id: String,
    pub user_id: String,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Model for Comment {
    const COLLECTION: &'static str = "comments";
}

/// One row per (tenant, post, user) in either the likes or favorites collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMark {
    pub tenant_id: String,
    pub post_id: String,
    pub user_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    Like,
    Favorite,
}

impl MarkKind {
    pub fn collection(self) -> &'static str {
        match self {
            MarkKind::Like => "likes",
            MarkKind::Favorite => "favorites",
        }
    }

    /// Post counter kept in step with the marks, if any.
    pub fn counter(self) -> Option<&'static str> {
        match self {
            MarkKind::Like => Some("likesCount"),
            MarkKind::Favorite => None,
        }
    }

    /// Key of the boolean returned to clients.
    pub fn state_key(self) -> &'static str {
        match self {
            MarkKind::Like => "liked",
            MarkKind::Favorite => "favorited",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    #[serde(rename = "_id")]
    pub id: String,
    pub tenant_id: String,
    pub post_id: String,
    pub user_id: String,
    pub target: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Model for Share {
    const COLLECTION: &'static str = "shares";
}
