use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures_util::TryStreamExt;
use log::{info, warn};
use mongodb::bson::doc;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{new_id, Comment};
use crate::pagination::PageQuery;
use crate::posts::{bump_counter, find_post};
use crate::validation::{self, Issues};

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub text: String,
}

/// POST /posts/{id}/comments
pub async fn create_comment(
    auth: AuthUser,
    data: web::Data<AppState>,
    post_id: web::Path<String>,
    body: web::Json<CreateCommentRequest>,
) -> ApiResult<HttpResponse> {
    let mut issues = Issues::new();
    issues.check(validation::len_between(&body.text, 1, 2000), "text", "must be 1-2000 characters");
    issues.finish()?;

    let post = find_post(&data, &auth, &post_id).await?;
    let now = Utc::now();
    let comment = Comment {
        id: new_id(),
        tenant_id: auth.tenant_id.clone(),
        post_id: post.id.clone(),
        user_id: auth.user_id.clone(),
        text: body.text.trim().to_string(),
        created_at: now,
        updated_at: now,
    };
    data.mongodb.coll::<Comment>().insert_one(&comment).await?;
    bump_counter(&data, &auth, &post.id, "commentsCount", 1).await;

    Ok(HttpResponse::Created().json(comment))
}

/// GET /posts/{id}/comments
pub async fn list_comments(
    auth: AuthUser,
    data: web::Data<AppState>,
    post_id: web::Path<String>,
    page: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let post = find_post(&data, &auth, &post_id).await?;
    let comments: Vec<Comment> = data
        .mongodb
        .coll::<Comment>()
        .find(doc! { "tenantId": &auth.tenant_id, "postId": &post.id })
        .sort(doc! { "createdAt": 1 })
        .skip(page.skip())
        .limit(page.limit())
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(comments))
}

/// DELETE /posts/{id}/comments/{comment_id}
///
/// Allowed for the comment's author and for moderators/admins.
pub async fn delete_comment(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (post_id, comment_id) = path.into_inner();
    let comments = data.mongodb.coll::<Comment>();
    let filter = doc! { "tenantId": &auth.tenant_id, "postId": &post_id, "_id": &comment_id };

    let comment = comments
        .find_one(filter.clone())
        .await?
        .ok_or(ApiError::NotFound("Comment not found"))?;

    if !auth.can_modify(&comment.user_id) {
        warn!("User {} tried to delete comment {} of {}", auth.user_id, comment.id, comment.user_id);
        return Err(ApiError::Forbidden("Only the author or a moderator may delete this comment"));
    }

    let result = comments.delete_one(filter).await?;
    if result.deleted_count == 1 {
        bump_counter(&data, &auth, &post_id, "commentsCount", -1).await;
    }
    info!("Comment {} deleted by {}", comment_id, auth.user_id);
    Ok(HttpResponse::NoContent().finish())
}
