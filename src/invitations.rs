use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{info, warn};
use mongodb::bson::doc;
use mongodb::options::ReturnDocument;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::groups::{add_member, find_group};
use crate::middleware::AuthUser;
use crate::models::{new_id, GroupRole, Invitation};
use crate::security::random_token;
use crate::validation::{self, Issues};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationRequest {
    pub email: String,
    pub group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
}

/// POST /invitations
///
/// Moderators and admins only.
pub async fn create_invitation(
    auth: AuthUser,
    data: web::Data<AppState>,
    body: web::Json<CreateInvitationRequest>,
) -> ApiResult<HttpResponse> {
    if !auth.role.can_moderate() {
        return Err(ApiError::Forbidden("Only moderators and admins may invite"));
    }

    let mut issues = Issues::new();
    issues.check(validation::is_email(body.email.trim()), "email", "must be a valid email");
    issues.finish()?;

    let group_id = match body.group_id.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        Some(group_id) => Some(find_group(&data, &auth, group_id).await?.id),
        None => None,
    };

    let invitation = Invitation {
        id: new_id(),
        tenant_id: auth.tenant_id.clone(),
        email: validation::normalize_email(&body.email),
        token: random_token(),
        group_id,
        created_by: auth.user_id.clone(),
        created_at: Utc::now(),
        used_at: None,
        used_by: None,
    };
    data.mongodb.coll::<Invitation>().insert_one(&invitation).await?;

    let accept_url = format!(
        "{}/accept-invite?token={}",
        data.config.public_base_url, invitation.token
    );
    info!("Invitation {} for {} created by {}", invitation.id, invitation.email, auth.user_id);
    Ok(HttpResponse::Created().json(json!({ "invitation": invitation, "acceptUrl": accept_url })))
}

/// POST /invitations/accept
///
/// Single use, and only by the account the invitation was addressed to.
pub async fn accept_invitation(
    auth: AuthUser,
    data: web::Data<AppState>,
    body: web::Json<AcceptInvitationRequest>,
) -> ApiResult<HttpResponse> {
    let invitations = data.mongodb.coll::<Invitation>();
    let token = body.token.trim();

    let invitation = invitations
        .find_one(doc! { "tenantId": &auth.tenant_id, "token": token })
        .await?
        .ok_or(ApiError::NotFound("Invitation not found"))?;

    if invitation.used_at.is_some() {
        return Err(ApiError::Conflict("Invitation already used"));
    }
    if invitation.email != auth.email.to_lowercase() {
        warn!("User {} tried to accept invitation {} for another email", auth.user_id, invitation.id);
        return Err(ApiError::Forbidden("Invitation was issued to a different email"));
    }

    let accepted = invitations
        .find_one_and_update(
            doc! { "tenantId": &auth.tenant_id, "_id": &invitation.id, "usedAt": null },
            doc! { "$set": { "usedAt": Utc::now().timestamp_millis(), "usedBy": &auth.user_id } },
        )
        .return_document(ReturnDocument::After)
        .await?
        .ok_or(ApiError::Conflict("Invitation already used"))?;

    if let Some(group_id) = &accepted.group_id {
        add_member(&data, &auth.tenant_id, group_id, &auth.user_id, GroupRole::Member).await?;
    }

    info!("Invitation {} accepted by {}", accepted.id, auth.user_id);
    Ok(HttpResponse::Ok().json(json!({ "accepted": true, "invitation": accepted })))
}
