use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Model;

/// Tenant-wide role carried in the token and checked for moderation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Moderator,
    Admin,
}

impl Role {
    /// Moderators and admins may act on other users' content.
    pub fn can_moderate(self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

/// Stored account. `user_id` is derived from the tenant and email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub tenant_id: String,
    pub email: String,
    pub username: String,
    pub username_lower: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    pub password_hash: String,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Model for User {
    const COLLECTION: &'static str = "users";
}

/// What the API exposes about an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub tenant_id: String,
    pub email: String,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub email_verified: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id.clone(),
            tenant_id: user.tenant_id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
            role: user.role,
            email_verified: user.email_verified,
            created_at: user.created_at,
        }
    }
}
