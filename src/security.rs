//! Token signing, password hashing and identifier helpers used by the auth
//! routes and the authentication middleware.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Role, User};

/// Provider recorded for password-based accounts.
pub const LOCAL_PROVIDER: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: String,
    pub tenant_id: String,
    pub role: Role,
    pub email: String,
    pub name: String,
    pub iat: usize,
    pub exp: usize,
}

pub fn create_jwt(user: &User, secret: &str, ttl_hours: i64) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.user_id.clone(),
        tenant_id: user.tenant_id.clone(),
        role: user.role,
        email: user.email.clone(),
        name: user.name.clone(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(ttl_hours)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Stable id for a local account: the same tenant and email always yield
/// the same id.
pub fn derive_user_id(tenant_id: &str, email: &str) -> String {
    let name = format!("{}:{}:{}", LOCAL_PROVIDER, tenant_id, email.trim().to_lowercase());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

pub fn hash_password(password: &str, pepper: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(format!("{}{}", password, pepper), cost)
}

pub fn verify_password(password: &str, pepper: &str, hash: &str) -> bool {
    bcrypt::verify(format!("{}{}", password, pepper), hash).unwrap_or(false)
}

/// Hex-encoded 256-bit random token for links and invitations.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        let now = Utc::now();
        User {
            user_id: derive_user_id("t1", "a@b.com"),
            tenant_id: "t1".into(),
            email: "a@b.com".into(),
            username: "alice".into(),
            username_lower: "alice".into(),
            name: "Alice".into(),
            role: Role::Moderator,
            password_hash: String::new(),
            providers: vec![LOCAL_PROVIDER.into()],
            email_verified: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn jwt_round_trip_keeps_identity() {
        let user = user();
        let token = create_jwt(&user, "secret", 1).unwrap();
        let claims = validate_jwt(&token, "secret").unwrap();
        assert_eq!(claims.sub, user.user_id);
        assert_eq!(claims.tenant_id, "t1");
        assert_eq!(claims.role, Role::Moderator);
    }

    #[test]
    fn jwt_with_wrong_secret_is_rejected() {
        let token = create_jwt(&user(), "secret", 1).unwrap();
        assert!(validate_jwt(&token, "other").is_err());
    }

    #[test]
    fn expired_jwt_is_rejected() {
        let token = create_jwt(&user(), "secret", -2).unwrap();
        assert!(validate_jwt(&token, "secret").is_err());
    }

    #[test]
    fn user_id_is_deterministic_and_tenant_scoped() {
        assert_eq!(derive_user_id("t1", "A@B.com"), derive_user_id("t1", "a@b.com"));
        assert_ne!(derive_user_id("t1", "a@b.com"), derive_user_id("t2", "a@b.com"));
    }

    #[test]
    fn password_hash_depends_on_pepper() {
        let hash = hash_password("password1", "pepper", 4).unwrap();
        assert!(verify_password("password1", "pepper", &hash));
        assert!(!verify_password("password1", "", &hash));
        assert!(!verify_password("password2", "pepper", &hash));
    }

    #[test]
    fn random_tokens_are_unique_hex() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
