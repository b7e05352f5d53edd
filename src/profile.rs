use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{info, warn};
use mongodb::bson::{doc, to_bson};
use mongodb::options::ReturnDocument;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::db::is_duplicate_key;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{Role, User, UserProfile};
use crate::validation::{self, Issues};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub username: Option<String>,
    /// Only honoured when dev role switching is enabled.
    pub role: Option<Role>,
}

impl UpdateProfileRequest {
    fn validate(&self) -> ApiResult<()> {
        let mut issues = Issues::new();
        if self.name.is_none() && self.username.is_none() && self.role.is_none() {
            issues.push("body", "no fields to update");
        }
        if let Some(name) = &self.name {
            issues.check(validation::len_between(name, 1, 100), "name", "must be 1-100 characters");
        }
        if let Some(username) = &self.username {
            issues.check(
                validation::is_username(username.trim()),
                "username",
                "must be 3-32 letters, digits, '.', '_' or '-'",
            );
        }
        issues.finish()
    }
}

/// GET /me
pub async fn get_me(auth: AuthUser, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let user = data
        .mongodb
        .coll::<User>()
        .find_one(doc! { "tenantId": &auth.tenant_id, "userId": &auth.user_id })
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    Ok(HttpResponse::Ok().json(UserProfile::from(&user)))
}

/// PATCH /me
pub async fn update_me(
    auth: AuthUser,
    data: web::Data<AppState>,
    body: web::Json<UpdateProfileRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;

    let mut set_doc = doc! { "updatedAt": Utc::now().timestamp_millis() };
    if let Some(name) = &body.name {
        set_doc.insert("name", name.trim());
    }
    if let Some(username) = &body.username {
        let username = username.trim();
        set_doc.insert("username", username);
        set_doc.insert("usernameLower", username.to_lowercase());
    }
    if let Some(role) = body.role {
        if !data.config.allow_dev_role_switch {
            warn!("User {} attempted a role change with switching disabled", auth.user_id);
            return Err(ApiError::Forbidden("Role changes are not allowed"));
        }
        set_doc.insert("role", to_bson(&role).map_err(ApiError::internal)?);
        info!("Dev role switch: user {} is now {}", auth.user_id, role.as_str());
    }

    let updated = data
        .mongodb
        .coll::<User>()
        .find_one_and_update(
            doc! { "tenantId": &auth.tenant_id, "userId": &auth.user_id },
            doc! { "$set": set_doc },
        )
        .return_document(ReturnDocument::After)
        .await;

    match updated {
        Ok(Some(user)) => Ok(HttpResponse::Ok().json(UserProfile::from(&user))),
        Ok(None) => Err(ApiError::NotFound("User not found")),
        Err(err) if is_duplicate_key(&err) => Err(ApiError::Conflict("Username already taken")),
        Err(err) => Err(err.into()),
    }
}
