//! Likes, favorites and shares on posts.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::debug;
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::db::is_duplicate_key;
use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::models::{new_id, MarkKind, PostMark, Share};
use crate::posts::{bump_counter, find_post};

/// Inserts the mark; an existing one counts as success and leaves the
/// counter alone.
async fn add_mark(auth: &AuthUser, data: &AppState, post_id: &str, kind: MarkKind) -> ApiResult<HttpResponse> {
    let post = find_post(data, auth, post_id).await?;
    let mark = PostMark {
        tenant_id: auth.tenant_id.clone(),
        post_id: post.id.clone(),
        user_id: auth.user_id.clone(),
        created_at: Utc::now(),
    };

    match data.mongodb.marks(kind).insert_one(&mark).await {
        Ok(_) => {
            if let Some(counter) = kind.counter() {
                bump_counter(data, auth, &post.id, counter, 1).await;
            }
        }
        Err(err) if is_duplicate_key(&err) => {
            debug!("{:?} on post {} by {} already recorded", kind, post.id, auth.user_id);
        }
        Err(err) => return Err(err.into()),
    }
    Ok(HttpResponse::Ok().json(json!({ kind.state_key(): true })))
}

/// Removing a missing mark is a no-op success.
async fn remove_mark(auth: &AuthUser, data: &AppState, post_id: &str, kind: MarkKind) -> ApiResult<HttpResponse> {
    let result = data
        .mongodb
        .marks(kind)
        .delete_one(doc! { "tenantId": &auth.tenant_id, "postId": post_id, "userId": &auth.user_id })
        .await?;
    if result.deleted_count > 0 {
        if let Some(counter) = kind.counter() {
            bump_counter(data, auth, post_id, counter, -1).await;
        }
    }
    Ok(HttpResponse::Ok().json(json!({ kind.state_key(): false })))
}

/// POST /posts/{id}/like
pub async fn like_post(auth: AuthUser, data: web::Data<AppState>, post_id: web::Path<String>) -> ApiResult<HttpResponse> {
    add_mark(&auth, &data, &post_id, MarkKind::Like).await
}

/// DELETE /posts/{id}/like
pub async fn unlike_post(auth: AuthUser, data: web::Data<AppState>, post_id: web::Path<String>) -> ApiResult<HttpResponse> {
    remove_mark(&auth, &data, &post_id, MarkKind::Like).await
}

/// POST /posts/{id}/favorite
pub async fn favorite_post(auth: AuthUser, data: web::Data<AppState>, post_id: web::Path<String>) -> ApiResult<HttpResponse> {
    add_mark(&auth, &data, &post_id, MarkKind::Favorite).await
}

/// DELETE /posts/{id}/favorite
pub async fn unfavorite_post(auth: AuthUser, data: web::Data<AppState>, post_id: web::Path<String>) -> ApiResult<HttpResponse> {
    remove_mark(&auth, &data, &post_id, MarkKind::Favorite).await
}

#[derive(Debug, Default, Deserialize)]
pub struct ShareRequest {
    pub target: Option<String>,
}

/// POST /posts/{id}/share
///
/// Shares are an append-only log; repeating a share records another one.
pub async fn share_post(
    auth: AuthUser,
    data: web::Data<AppState>,
    post_id: web::Path<String>,
    body: Option<web::Json<ShareRequest>>,
) -> ApiResult<HttpResponse> {
    let post = find_post(&data, &auth, &post_id).await?;
    let target = body
        .and_then(|b| b.into_inner().target)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let share = Share {
        id: new_id(),
        tenant_id: auth.tenant_id.clone(),
        post_id: post.id.clone(),
        user_id: auth.user_id.clone(),
        target,
        created_at: Utc::now(),
    };
    data.mongodb.coll::<Share>().insert_one(&share).await?;
    bump_counter(&data, &auth, &post.id, "sharesCount", 1).await;

    Ok(HttpResponse::Created().json(json!({ "shared": true, "share": share })))
}
