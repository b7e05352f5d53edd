use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures_util::TryStreamExt;
use log::{debug, info};
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::db::is_duplicate_key;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{new_id, Group, GroupMember, GroupRole};
use crate::pagination::PageQuery;
use crate::validation::{self, Issues};

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
}

impl CreateGroupRequest {
    /// Validated `(name, slug, description)`.
    fn normalize(&self) -> ApiResult<(String, String, Option<String>)> {
        let name = self.name.trim().to_string();
        let slug = validation::slugify(self.slug.as_deref().unwrap_or(&name));
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let mut issues = Issues::new();
        issues
            .check(validation::len_between(&name, 1, 100), "name", "must be 1-100 characters")
            .check(
                !slug.is_empty() && slug.len() <= 100,
                "slug",
                "must contain letters or digits",
            )
            .check(
                description.as_deref().map_or(true, |d| d.chars().count() <= 2000),
                "description",
                "must be at most 2000 characters",
            );
        issues.finish()?;
        Ok((name, slug, description))
    }
}

pub(crate) async fn find_group(data: &AppState, auth: &AuthUser, group_id: &str) -> ApiResult<Group> {
    data.mongodb
        .coll::<Group>()
        .find_one(doc! { "tenantId": &auth.tenant_id, "_id": group_id })
        .await?
        .ok_or(ApiError::NotFound("Group not found"))
}

/// Inserts a membership; an existing one is left as is.
pub(crate) async fn add_member(
    data: &AppState,
    tenant_id: &str,
    group_id: &str,
    user_id: &str,
    role: GroupRole,
) -> ApiResult<bool> {
    let member = GroupMember {
        tenant_id: tenant_id.to_string(),
        group_id: group_id.to_string(),
        user_id: user_id.to_string(),
        role,
        joined_at: Utc::now(),
    };
    match data.mongodb.coll::<GroupMember>().insert_one(&member).await {
        Ok(_) => Ok(true),
        Err(err) if is_duplicate_key(&err) => {
            debug!("User {} already in group {}", user_id, group_id);
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

/// POST /groups
///
/// The creator becomes the group's owner.
pub async fn create_group(
    auth: AuthUser,
    data: web::Data<AppState>,
    body: web::Json<CreateGroupRequest>,
) -> ApiResult<HttpResponse> {
    let (name, slug, description) = body.normalize()?;
    let group = Group {
        id: new_id(),
        tenant_id: auth.tenant_id.clone(),
        name,
        slug,
        description,
        created_by: auth.user_id.clone(),
        created_at: Utc::now(),
    };

    match data.mongodb.coll::<Group>().insert_one(&group).await {
        Ok(_) => {}
        Err(err) if is_duplicate_key(&err) => return Err(ApiError::Conflict("Group slug already in use")),
        Err(err) => return Err(err.into()),
    }
    add_member(&data, &auth.tenant_id, &group.id, &auth.user_id, GroupRole::Owner).await?;

    info!("Group {} ({}) created by {}", group.id, group.slug, auth.user_id);
    Ok(HttpResponse::Created().json(group))
}

/// GET /groups
pub async fn list_groups(
    auth: AuthUser,
    data: web::Data<AppState>,
    page: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let groups: Vec<Group> = data
        .mongodb
        .coll::<Group>()
        .find(doc! { "tenantId": &auth.tenant_id })
        .sort(doc! { "name": 1 })
        .skip(page.skip())
        .limit(page.limit())
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(groups))
}

/// POST /groups/{id}/join
pub async fn join_group(
    auth: AuthUser,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let group = find_group(&data, &auth, &group_id).await?;
    let added = add_member(&data, &auth.tenant_id, &group.id, &auth.user_id, GroupRole::Member).await?;
    if added {
        info!("User {} joined group {}", auth.user_id, group.id);
    }
    Ok(HttpResponse::Ok().json(json!({ "joined": true, "groupId": group.id })))
}

/// GET /groups/{id}/members
pub async fn list_members(
    auth: AuthUser,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
    page: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let group = find_group(&data, &auth, &group_id).await?;
    let members: Vec<GroupMember> = data
        .mongodb
        .coll::<GroupMember>()
        .find(doc! { "tenantId": &auth.tenant_id, "groupId": &group.id })
        .sort(doc! { "joinedAt": 1 })
        .skip(page.skip())
        .limit(page.limit())
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(members))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_falls_back_to_name() {
        let request = CreateGroupRequest {
            name: "Berlin Runners".into(),
            slug: None,
            description: Some("  ".into()),
        };
        let (name, slug, description) = request.normalize().unwrap();
        assert_eq!(name, "Berlin Runners");
        assert_eq!(slug, "berlin-runners");
        assert_eq!(description, None);
    }

    #[test]
    fn explicit_slug_is_normalised() {
        let request = CreateGroupRequest {
            name: "Runners".into(),
            slug: Some("Run Club!".into()),
            description: None,
        };
        assert_eq!(request.normalize().unwrap().1, "run-club");
    }

    #[test]
    fn name_without_slug_characters_is_rejected() {
        let request = CreateGroupRequest {
            name: "!!!".into(),
            slug: None,
            description: None,
        };
        assert!(matches!(request.normalize(), Err(ApiError::Validation(_))));
    }
}
