use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{debug, info, warn};
use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::options::ReturnDocument;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::db::is_duplicate_key;
use crate::error::{ApiError, ApiResult};
use crate::models::{OneTimeToken, Role, TokenKind, User, UserProfile};
use crate::security::{
    create_jwt, derive_user_id, hash_password, random_token, verify_password, LOCAL_PROVIDER,
};
use crate::validation::{self, Issues};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub tenant_id: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub name: String,
}

impl SignupRequest {
    fn validate(&self) -> ApiResult<()> {
        let mut issues = Issues::new();
        issues
            .check(
                validation::is_tenant_id(self.tenant_id.trim()),
                "tenantId",
                "must be 1-64 letters, digits, '.', '_' or '-'",
            )
            .check(validation::is_email(self.email.trim()), "email", "must be a valid email")
            .check(
                validation::is_username(self.username.trim()),
                "username",
                "must be 3-32 letters, digits, '.', '_' or '-'",
            )
            .check(
                validation::is_password(&self.password),
                "password",
                "must be at least 8 characters",
            )
            .check(validation::len_between(&self.name, 1, 100), "name", "must be 1-100 characters");
        issues.finish()
    }
}

/// Accepts `identifier`, `email` or `username` for the login name.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub tenant_id: String,
    #[serde(alias = "email", alias = "username")]
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    pub tenant_id: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetConfirmRequest {
    pub tenant_id: String,
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyConfirmRequest {
    pub tenant_id: String,
    pub token: String,
}

fn session_body(user: &User, config: &crate::config::Config) -> ApiResult<serde_json::Value> {
    let token = create_jwt(user, &config.jwt_secret, config.token_ttl_hours).map_err(ApiError::internal)?;
    Ok(json!({ "token": token, "user": UserProfile::from(user) }))
}

/// Stores a fresh single-use token and returns the client link for it.
async fn issue_token(data: &AppState, kind: TokenKind, user: &User) -> ApiResult<String> {
    let now = Utc::now();
    let record = OneTimeToken {
        tenant_id: user.tenant_id.clone(),
        user_id: user.user_id.clone(),
        email: user.email.clone(),
        token: random_token(),
        expires_at: BsonDateTime::from_millis((now + kind.ttl()).timestamp_millis()),
        used_at: None,
        created_at: BsonDateTime::from_millis(now.timestamp_millis()),
    };
    data.mongodb.tokens(kind).insert_one(&record).await?;

    let link = format!(
        "{}/{}?tenantId={}&token={}",
        data.config.public_base_url,
        kind.link_path(),
        record.tenant_id,
        record.token
    );
    info!("Issued {:?} token for user {}: {}", kind, user.user_id, link);
    Ok(link)
}

/// Marks an unused, unexpired token as used and returns it.
async fn consume_token(data: &AppState, kind: TokenKind, tenant_id: &str, token: &str) -> ApiResult<OneTimeToken> {
    let now = BsonDateTime::now();
    data.mongodb
        .tokens(kind)
        .find_one_and_update(
            doc! {
                "tenantId": tenant_id,
                "token": token,
                "usedAt": null,
                "expiresAt": { "$gt": now },
            },
            doc! { "$set": { "usedAt": now } },
        )
        .return_document(ReturnDocument::After)
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired token"))
}

async fn find_by_email(data: &AppState, tenant_id: &str, email: &str) -> ApiResult<Option<User>> {
    Ok(data
        .mongodb
        .coll::<User>()
        .find_one(doc! { "tenantId": tenant_id, "email": validation::normalize_email(email) })
        .await?)
}

/// POST /auth/signup
pub async fn signup(data: web::Data<AppState>, body: web::Json<SignupRequest>) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    body.validate()?;

    let tenant_id = body.tenant_id.trim().to_string();
    let email = validation::normalize_email(&body.email);
    let username = body.username.trim().to_string();
    let username_lower = username.to_lowercase();
    let users = data.mongodb.coll::<User>();

    if users
        .find_one(doc! { "tenantId": &tenant_id, "email": &email })
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("Email already in use"));
    }
    if users
        .find_one(doc! { "tenantId": &tenant_id, "usernameLower": &username_lower })
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("Username already taken"));
    }

    let password = body.password;
    let pepper = data.config.password_pepper.clone();
    let cost = data.config.bcrypt_cost;
    let password_hash = web::block(move || hash_password(&password, &pepper, cost))
        .await?
        .map_err(ApiError::internal)?;

    let now = Utc::now();
    let user = User {
        user_id: derive_user_id(&tenant_id, &email),
        tenant_id,
        email,
        username,
        username_lower,
        name: body.name.trim().to_string(),
        role: Role::Member,
        password_hash,
        providers: vec![LOCAL_PROVIDER.to_string()],
        email_verified: false,
        created_at: now,
        updated_at: now,
    };

    if let Err(err) = users.insert_one(&user).await {
        if is_duplicate_key(&err) {
            return Err(ApiError::Conflict("Email or username already in use"));
        }
        return Err(err.into());
    }
    info!("Account created: {} in tenant {}", user.user_id, user.tenant_id);

    if data.config.require_email_verification {
        let link = issue_token(&data, TokenKind::EmailVerification, &user).await?;
        let mut body = json!({
            "requiresVerification": true,
            "message": "Check your email to verify your account",
            "user": UserProfile::from(&user),
        });
        if data.config.expose_dev_links {
            body["verificationUrl"] = json!(link);
        }
        return Ok(HttpResponse::Created().json(body));
    }

    Ok(HttpResponse::Created().json(session_body(&user, &data.config)?))
}

/// POST /auth/login
pub async fn login(data: web::Data<AppState>, body: web::Json<LoginRequest>) -> ApiResult<HttpResponse> {
    let identifier = body.identifier.trim().to_lowercase();
    if body.tenant_id.trim().is_empty() || identifier.is_empty() {
        return Err(ApiError::Unauthorized("INVALID_CREDENTIALS"));
    }

    let user = data
        .mongodb
        .coll::<User>()
        .find_one(doc! {
            "tenantId": body.tenant_id.trim(),
            "$or": [ { "email": &identifier }, { "usernameLower": &identifier } ],
        })
        .await?;

    let Some(user) = user else {
        debug!("Login for unknown identifier in tenant {}", body.tenant_id);
        return Err(ApiError::Unauthorized("INVALID_CREDENTIALS"));
    };

    let password = body.password.clone();
    let pepper = data.config.password_pepper.clone();
    let hash = user.password_hash.clone();
    let valid = web::block(move || verify_password(&password, &pepper, &hash)).await?;
    if !valid {
        warn!("Failed login for user {}", user.user_id);
        return Err(ApiError::Unauthorized("INVALID_CREDENTIALS"));
    }

    if data.config.require_email_verification && !user.email_verified {
        return Err(ApiError::Forbidden("EMAIL_NOT_VERIFIED"));
    }

    Ok(HttpResponse::Ok().json(session_body(&user, &data.config)?))
}

/// POST /auth/password-reset/request
///
/// Answers the same way whether or not the account exists.
pub async fn request_password_reset(
    data: web::Data<AppState>,
    body: web::Json<EmailRequest>,
) -> ApiResult<HttpResponse> {
    let mut response = json!({ "ok": true });
    if let Some(user) = find_by_email(&data, body.tenant_id.trim(), &body.email).await? {
        let link = issue_token(&data, TokenKind::PasswordReset, &user).await?;
        if data.config.expose_dev_links {
            response["resetUrl"] = json!(link);
        }
    }
    Ok(HttpResponse::Ok().json(response))
}

/// POST /auth/password-reset/confirm
pub async fn confirm_password_reset(
    data: web::Data<AppState>,
    body: web::Json<ResetConfirmRequest>,
) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    let mut issues = Issues::new();
    issues.check(
        validation::is_password(&body.password),
        "password",
        "must be at least 8 characters",
    );
    issues.finish()?;

    // The token is only spent once the new hash is ready.
    let password = body.password;
    let pepper = data.config.password_pepper.clone();
    let cost = data.config.bcrypt_cost;
    let password_hash = web::block(move || hash_password(&password, &pepper, cost))
        .await?
        .map_err(ApiError::internal)?;

    let token = consume_token(&data, TokenKind::PasswordReset, body.tenant_id.trim(), body.token.trim()).await?;

    let result = data
        .mongodb
        .coll::<User>()
        .update_one(
            doc! { "tenantId": &token.tenant_id, "userId": &token.user_id },
            doc! { "$set": { "passwordHash": password_hash, "updatedAt": Utc::now().timestamp_millis() } },
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::bad_request("Invalid or expired token"));
    }

    info!("Password reset for user {}", token.user_id);
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

/// POST /auth/email-verification/resend
pub async fn resend_verification(
    data: web::Data<AppState>,
    body: web::Json<EmailRequest>,
) -> ApiResult<HttpResponse> {
    let mut response = json!({ "ok": true });
    if let Some(user) = find_by_email(&data, body.tenant_id.trim(), &body.email).await? {
        if !user.email_verified {
            let link = issue_token(&data, TokenKind::EmailVerification, &user).await?;
            if data.config.expose_dev_links {
                response["verificationUrl"] = json!(link);
            }
        }
    }
    Ok(HttpResponse::Ok().json(response))
}

/// POST /auth/email-verification/confirm
pub async fn confirm_verification(
    data: web::Data<AppState>,
    body: web::Json<VerifyConfirmRequest>,
) -> ApiResult<HttpResponse> {
    let token = consume_token(
        &data,
        TokenKind::EmailVerification,
        body.tenant_id.trim(),
        body.token.trim(),
    )
    .await?;

    let result = data
        .mongodb
        .coll::<User>()
        .update_one(
            doc! { "tenantId": &token.tenant_id, "userId": &token.user_id },
            doc! { "$set": { "emailVerified": true, "updatedAt": Utc::now().timestamp_millis() } },
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::bad_request("Invalid or expired token"));
    }

    info!("Email verified for user {}", token.user_id);
    Ok(HttpResponse::Ok().json(json!({ "verified": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(username: &str, password: &str) -> SignupRequest {
        SignupRequest {
            tenant_id: "t1".into(),
            email: "a@b.com".into(),
            username: username.into(),
            password: password.into(),
            name: "Alice".into(),
        }
    }

    #[test]
    fn valid_signup_passes() {
        assert!(signup("alice", "password1").validate().is_ok());
    }

    #[test]
    fn short_username_and_password_are_both_reported() {
        match signup("al", "short").validate() {
            Err(ApiError::Validation(issues)) => {
                let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
                assert_eq!(fields, vec!["username", "password"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn operator_like_tenant_is_rejected() {
        let mut request = signup("alice", "password1");
        request.tenant_id = "$userId".into();
        match request.validate() {
            Err(ApiError::Validation(issues)) => assert_eq!(issues[0].field, "tenantId"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn login_accepts_email_or_username_keys() {
        let by_email: LoginRequest =
            serde_json::from_str(r#"{"tenantId":"t1","email":"a@b.com","password":"x"}"#).unwrap();
        assert_eq!(by_email.identifier, "a@b.com");
        let by_name: LoginRequest =
            serde_json::from_str(r#"{"tenantId":"t1","username":"alice","password":"x"}"#).unwrap();
        assert_eq!(by_name.identifier, "alice");
    }
}
