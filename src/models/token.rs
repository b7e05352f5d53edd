use mongodb::bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

/// Time-bound, single-use token for password resets and email verification.
///
/// `expires_at` stays a BSON date so the TTL index can reap it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeToken {
    pub tenant_id: String,
    pub user_id: String,
    pub email: String,
    pub token: String,
    pub expires_at: BsonDateTime,
    pub used_at: Option<BsonDateTime>,
    pub created_at: BsonDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    PasswordReset,
    EmailVerification,
}

impl TokenKind {
    pub const ALL: [TokenKind; 2] = [TokenKind::PasswordReset, TokenKind::EmailVerification];

    pub fn collection(self) -> &'static str {
        match self {
            TokenKind::PasswordReset => "password_resets",
            TokenKind::EmailVerification => "email_verifications",
        }
    }

    pub fn ttl(self) -> chrono::Duration {
        match self {
            TokenKind::PasswordReset => chrono::Duration::hours(1),
            TokenKind::EmailVerification => chrono::Duration::hours(24),
        }
    }

    /// Client route that consumes the token.
    pub fn link_path(self) -> &'static str {
        match self {
            TokenKind::PasswordReset => "reset-password",
            TokenKind::EmailVerification => "verify-email",
        }
    }
}
