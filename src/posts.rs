use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures_util::TryStreamExt;
use log::{debug, error, info};
use mongodb::bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::geo::{self, GeoPoint};
use crate::middleware::AuthUser;
use crate::models::{new_id, Attachment, Comment, MarkKind, Post, Share};
use crate::pagination::{clamp_limit, PageQuery, DEFAULT_LIMIT};
use crate::uploads::{remove_attachments, save_field};
use crate::validation::{self, Issues};

pub const MAX_ATTACHMENTS: usize = 5;
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

/// A post as returned to clients, annotated for the requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    #[serde(default)]
    pub liked_by_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorited_by_me: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// Raw text fields of the multipart post form.
#[derive(Debug, Default)]
pub struct PostForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub lat: Option<String>,
    pub lng: Option<String>,
}

pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub location: Option<GeoPoint>,
}

impl PostForm {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "title" => self.title = Some(value),
            "content" => self.content = Some(value),
            "category" => self.category = Some(value),
            "lat" | "latitude" => self.lat = Some(value),
            "lng" | "longitude" => self.lng = Some(value),
            other => debug!("Ignoring unknown post field {}", other),
        }
    }

    pub fn validate(self) -> ApiResult<NewPost> {
        let mut issues = Issues::new();
        let title = self.title.unwrap_or_default().trim().to_string();
        let content = self.content.unwrap_or_default().trim().to_string();
        let category = non_empty(self.category);

        issues
            .check(validation::len_between(&title, 1, 200), "title", "must be 1-200 characters")
            .check(content.chars().count() <= 10_000, "content", "must be at most 10000 characters");
        if let Some(category) = &category {
            issues.check(category.chars().count() <= 50, "category", "must be at most 50 characters");
        }

        let lat = parse_coordinate(non_empty(self.lat), "lat", &mut issues);
        let lng = parse_coordinate(non_empty(self.lng), "lng", &mut issues);
        let location = geo::point_from_parts(lat, lng, &mut issues);

        issues.finish()?;
        Ok(NewPost { title, content, category, location })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_coordinate(value: Option<String>, field: &str, issues: &mut Issues) -> Option<f64> {
    let value = value?;
    match value.parse::<f64>() {
        Ok(number) => Some(number),
        Err(_) => {
            issues.push(field, "must be a number");
            None
        }
    }
}

async fn read_text(field: &mut Field) -> ApiResult<String> {
    let mut buf = Vec::new();
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid form data: {}", e)))?
    {
        if buf.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(ApiError::bad_request("Form field too large"));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| ApiError::bad_request("Form fields must be UTF-8"))
}

/// Reads the whole form; files are written as they arrive.
async fn read_form(
    payload: &mut Multipart,
    config: &Config,
    tenant_id: &str,
    form: &mut PostForm,
    attachments: &mut Vec<Attachment>,
) -> ApiResult<()> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid form data: {}", e)))?
    {
        let is_file = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .is_some();

        if is_file {
            if attachments.len() >= MAX_ATTACHMENTS {
                return Err(ApiError::Validation(vec![crate::error::FieldIssue::new(
                    "attachments",
                    format!("at most {} files are allowed", MAX_ATTACHMENTS),
                )]));
            }
            attachments.push(save_field(&mut field, config, tenant_id).await?);
        } else {
            let name = field.name().unwrap_or_default().to_string();
            let value = read_text(&mut field).await?;
            form.set(&name, value);
        }
    }
    Ok(())
}

/// `$lookup` stages that add `<flag>` when the requester has a mark on the post.
fn mark_stages(kind: MarkKind, flag: &str, auth: &AuthUser) -> Vec<Document> {
    let joined = format!("_{}", flag);
    vec![
        doc! {
            "$lookup": {
                "from": kind.collection(),
                "let": { "postId": "$_id" },
                "pipeline": [
                    { "$match": {
                        "tenantId": &auth.tenant_id,
                        "userId": &auth.user_id,
                        "$expr": { "$eq": ["$postId", "$$postId"] },
                    } },
                    { "$limit": 1 },
                ],
                "as": &joined,
            }
        },
        doc! { "$addFields": { flag: { "$gt": [ { "$size": format!("${}", joined) }, 0 ] } } },
        doc! { "$project": { joined: 0 } },
    ]
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPostsQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub limit: Option<i64>,
    pub page: Option<u64>,
    pub q: Option<String>,
    pub category: Option<String>,
}

/// Aggregation for `GET /posts`: a radius search when both coordinates are
/// present, otherwise a reverse-chronological page.
pub fn list_pipeline(auth: &AuthUser, query: &ListPostsQuery) -> ApiResult<Vec<Document>> {
    let mut issues = Issues::new();
    let near = geo::point_from_parts(query.lat, query.lng, &mut issues);
    let max_distance = near.map(|_| geo::radius_meters(query.radius_km, &mut issues));
    issues.finish()?;

    let mut filter = doc! { "tenantId": &auth.tenant_id };
    if let Some(category) = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        filter.insert("category", category);
    }
    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = regex::escape(q);
        filter.insert(
            "$or",
            vec![
                Bson::Document(doc! { "title": { "$regex": &pattern, "$options": "i" } }),
                Bson::Document(doc! { "content": { "$regex": &pattern, "$options": "i" } }),
            ],
        );
    }

    let limit = clamp_limit(query.limit);
    let mut pipeline = match (near, max_distance) {
        (Some(point), Some(max_distance)) => vec![
            doc! {
                "$geoNear": {
                    "near": { "type": "Point", "coordinates": [point.lng(), point.lat()] },
                    "distanceField": "distanceMeters",
                    "maxDistance": max_distance,
                    "spherical": true,
                    "key": "location",
                    "query": filter,
                }
            },
            doc! { "$sort": { "distanceMeters": 1, "createdAt": -1 } },
            doc! { "$limit": limit },
            doc! { "$addFields": { "distanceKm": { "$divide": ["$distanceMeters", 1000] } } },
            doc! { "$project": { "distanceMeters": 0 } },
        ],
        _ => {
            let page = PageQuery { page: query.page, limit: Some(limit) };
            vec![
                doc! { "$match": filter },
                doc! { "$sort": { "createdAt": -1 } },
                doc! { "$skip": page.skip() as i64 },
                doc! { "$limit": limit },
            ]
        }
    };
    pipeline.extend(mark_stages(MarkKind::Like, "likedByMe", auth));
    Ok(pipeline)
}

async fn run_view_pipeline(data: &AppState, pipeline: Vec<Document>) -> ApiResult<Vec<PostView>> {
    let cursor = data.mongodb.coll::<Post>().aggregate(pipeline).await?;
    Ok(cursor.with_type::<PostView>().try_collect().await?)
}

pub(crate) async fn find_post(data: &AppState, auth: &AuthUser, post_id: &str) -> ApiResult<Post> {
    data.mongodb
        .coll::<Post>()
        .find_one(doc! { "tenantId": &auth.tenant_id, "_id": post_id })
        .await?
        .ok_or(ApiError::NotFound("Post not found"))
}

/// Moves a post counter; the paired write is not transactional.
pub(crate) async fn bump_counter(data: &AppState, auth: &AuthUser, post_id: &str, field: &str, delta: i64) {
    let result = data
        .mongodb
        .coll::<Post>()
        .update_one(
            doc! { "tenantId": &auth.tenant_id, "_id": post_id },
            doc! { "$inc": { field: delta } },
        )
        .await;
    if let Err(e) = result {
        error!("Counter {} on post {} drifted: {}", field, post_id, e);
    }
}

/// POST /posts (multipart)
pub async fn create_post(
    auth: AuthUser,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> ApiResult<HttpResponse> {
    let mut form = PostForm::default();
    let mut attachments = Vec::new();

    if let Err(err) = read_form(&mut payload, &data.config, &auth.tenant_id, &mut form, &mut attachments).await {
        remove_attachments(&data.config, &auth.tenant_id, &attachments).await;
        return Err(err);
    }
    let input = match form.validate() {
        Ok(input) => input,
        Err(err) => {
            remove_attachments(&data.config, &auth.tenant_id, &attachments).await;
            return Err(err);
        }
    };

    let now = Utc::now();
    let post = Post {
        id: new_id(),
        tenant_id: auth.tenant_id.clone(),
        user_id: auth.user_id.clone(),
        title: input.title,
        content: input.content,
        category: input.category,
        attachments,
        location: input.location,
        comments_count: 0,
        likes_count: 0,
        shares_count: 0,
        created_at: now,
        updated_at: now,
    };

    if let Err(err) = data.mongodb.coll::<Post>().insert_one(&post).await {
        remove_attachments(&data.config, &auth.tenant_id, &post.attachments).await;
        return Err(err.into());
    }
    info!("Post {} created by {}", post.id, auth.user_id);
    Ok(HttpResponse::Created().json(post))
}

/// GET /posts
pub async fn list_posts(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ListPostsQuery>,
) -> ApiResult<HttpResponse> {
    let pipeline = list_pipeline(&auth, &query)?;
    let posts = run_view_pipeline(&data, pipeline).await?;
    Ok(HttpResponse::Ok().json(posts))
}

/// GET /posts/{id}
pub async fn get_post(
    auth: AuthUser,
    data: web::Data<AppState>,
    post_id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let mut pipeline = vec![doc! { "$match": { "tenantId": &auth.tenant_id, "_id": post_id.as_str() } }];
    pipeline.extend(mark_stages(MarkKind::Like, "likedByMe", &auth));
    pipeline.extend(mark_stages(MarkKind::Favorite, "favoritedByMe", &auth));

    let post = run_view_pipeline(&data, pipeline)
        .await?
        .into_iter()
        .next()
        .ok_or(ApiError::NotFound("Post not found"))?;

    let comments: Vec<Comment> = data
        .mongodb
        .coll::<Comment>()
        .find(doc! { "tenantId": &auth.tenant_id, "postId": post_id.as_str() })
        .sort(doc! { "createdAt": 1 })
        .limit(DEFAULT_LIMIT)
        .await?
        .try_collect()
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "post": post, "comments": comments })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
}

/// PATCH /posts/{id}
pub async fn update_post(
    auth: AuthUser,
    data: web::Data<AppState>,
    post_id: web::Path<String>,
    body: web::Json<UpdatePostRequest>,
) -> ApiResult<HttpResponse> {
    let post = find_post(&data, &auth, &post_id).await?;
    if !auth.can_modify(&post.user_id) {
        return Err(ApiError::Forbidden("Only the author or a moderator may edit this post"));
    }

    let mut issues = Issues::new();
    let mut set_doc = doc! {};
    if let Some(title) = &body.title {
        issues.check(validation::len_between(title, 1, 200), "title", "must be 1-200 characters");
        set_doc.insert("title", title.trim());
    }
    if let Some(content) = &body.content {
        issues.check(content.chars().count() <= 10_000, "content", "must be at most 10000 characters");
        set_doc.insert("content", content.trim());
    }
    if let Some(category) = &body.category {
        issues.check(category.chars().count() <= 50, "category", "must be at most 50 characters");
        let category = category.trim();
        set_doc.insert("category", if category.is_empty() { Bson::Null } else { Bson::from(category) });
    }
    if set_doc.is_empty() {
        issues.push("body", "no fields to update");
    }
    issues.finish()?;
    set_doc.insert("updatedAt", Utc::now().timestamp_millis());

    let updated = data
        .mongodb
        .coll::<Post>()
        .find_one_and_update(
            doc! { "tenantId": &auth.tenant_id, "_id": &post.id },
            doc! { "$set": set_doc },
        )
        .return_document(mongodb::options::ReturnDocument::After)
        .await?
        .ok_or(ApiError::NotFound("Post not found"))?;
    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /posts/{id}
pub async fn delete_post(
    auth: AuthUser,
    data: web::Data<AppState>,
    post_id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let post = find_post(&data, &auth, &post_id).await?;
    if !auth.can_modify(&post.user_id) {
        return Err(ApiError::Forbidden("Only the author or a moderator may delete this post"));
    }

    let db = &data.mongodb;
    let scope = doc! { "tenantId": &auth.tenant_id, "postId": &post.id };
    db.coll::<Post>()
        .delete_one(doc! { "tenantId": &auth.tenant_id, "_id": &post.id })
        .await?;
    db.coll::<Comment>().delete_many(scope.clone()).await?;
    db.coll::<Share>().delete_many(scope.clone()).await?;
    for kind in [MarkKind::Like, MarkKind::Favorite] {
        db.marks(kind).delete_many(scope.clone()).await?;
    }
    remove_attachments(&data.config, &auth.tenant_id, &post.attachments).await;

    info!("Post {} deleted by {}", post.id, auth.user_id);
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn viewer() -> AuthUser {
        AuthUser {
            user_id: "u1".into(),
            tenant_id: "t1".into(),
            role: Role::Member,
            email: "a@b.com".into(),
            name: "Alice".into(),
        }
    }

    fn stage_name(stage: &Document) -> &str {
        stage.keys().next().map(String::as_str).unwrap_or_default()
    }

    #[test]
    fn plain_listing_is_newest_first() {
        let pipeline = list_pipeline(&viewer(), &ListPostsQuery::default()).unwrap();
        assert_eq!(stage_name(&pipeline[0]), "$match");
        assert_eq!(
            pipeline[1].get_document("$sort").unwrap().get_i32("createdAt").unwrap(),
            -1
        );
    }

    #[test]
    fn coordinates_switch_to_geo_near_with_zero_radius() {
        let query = ListPostsQuery {
            lat: Some(52.52),
            lng: Some(13.40),
            radius_km: Some(0.0),
            ..Default::default()
        };
        let pipeline = list_pipeline(&viewer(), &query).unwrap();
        let geo_near = pipeline[0].get_document("$geoNear").unwrap();
        assert_eq!(geo_near.get_f64("maxDistance").unwrap(), 0.0);
        let coordinates = geo_near
            .get_document("near")
            .unwrap()
            .get_array("coordinates")
            .unwrap();
        assert_eq!(coordinates[0], Bson::Double(13.40));
        assert_eq!(
            geo_near.get_document("query").unwrap().get_str("tenantId").unwrap(),
            "t1"
        );
    }

    #[test]
    fn free_text_is_escaped_and_case_insensitive() {
        let query = ListPostsQuery {
            q: Some("c++ (rust)".into()),
            category: Some("tech".into()),
            ..Default::default()
        };
        let pipeline = list_pipeline(&viewer(), &query).unwrap();
        let filter = pipeline[0].get_document("$match").unwrap();
        assert_eq!(filter.get_str("category").unwrap(), "tech");
        let or = filter.get_array("$or").unwrap();
        let title = or[0].as_document().unwrap().get_document("title").unwrap();
        assert_eq!(title.get_str("$regex").unwrap(), r"c\+\+ \(rust\)");
        assert_eq!(title.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn every_listing_is_annotated_with_liked_by_me() {
        let pipeline = list_pipeline(&viewer(), &ListPostsQuery::default()).unwrap();
        assert!(pipeline
            .iter()
            .any(|stage| stage.get_document("$addFields").map_or(false, |f| f.contains_key("likedByMe"))));
    }

    #[test]
    fn negative_radius_is_a_validation_error() {
        let query = ListPostsQuery {
            lat: Some(0.0),
            lng: Some(0.0),
            radius_km: Some(-5.0),
            ..Default::default()
        };
        assert!(matches!(list_pipeline(&viewer(), &query), Err(ApiError::Validation(_))));
    }

    #[test]
    fn liked_lookup_matches_identity_literally() {
        let mut auth = viewer();
        auth.tenant_id = "$userId".into();
        let pipeline = list_pipeline(&auth, &ListPostsQuery::default()).unwrap();
        let lookup = pipeline
            .iter()
            .find_map(|stage| stage.get_document("$lookup").ok())
            .unwrap();
        let inner = lookup.get_array("pipeline").unwrap()[0]
            .as_document()
            .unwrap()
            .get_document("$match")
            .unwrap();
        assert_eq!(inner.get_str("tenantId").unwrap(), "$userId");
        assert_eq!(inner.get_str("userId").unwrap(), "u1");
        let expr = inner.get_document("$expr").unwrap();
        assert_eq!(
            expr.get_array("$eq").unwrap(),
            &vec![Bson::from("$postId"), Bson::from("$$postId")]
        );
    }

    #[test]
    fn huge_page_keeps_skip_non_negative() {
        let query = ListPostsQuery {
            page: Some(u64::MAX / 2),
            ..Default::default()
        };
        let pipeline = list_pipeline(&viewer(), &query).unwrap();
        let skip = pipeline
            .iter()
            .find_map(|stage| stage.get_i64("$skip").ok())
            .unwrap();
        assert!(skip >= 0);
    }

    #[test]
    fn form_requires_a_title_and_full_coordinates() {
        let form = PostForm {
            title: Some("  ".into()),
            lat: Some("10".into()),
            ..Default::default()
        };
        match form.validate() {
            Err(ApiError::Validation(issues)) => {
                let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
                assert!(fields.contains(&"title"));
                assert!(fields.contains(&"lng"));
            }
            _ => panic!("expected validation failure"),
        }
    }

    #[test]
    fn form_builds_a_located_post() {
        let form = PostForm {
            title: Some("Lost cat".into()),
            content: Some("Grey, answers to Mo".into()),
            category: Some(" ".into()),
            lat: Some("52.5".into()),
            lng: Some("13.4".into()),
        };
        let post = form.validate().unwrap();
        assert_eq!(post.category, None);
        assert_eq!(post.location, Some(GeoPoint::new(52.5, 13.4)));
    }

    #[test]
    fn view_flattens_post_fields() {
        let now = Utc::now();
        let view = PostView {
            post: Post {
                id: "p1".into(),
                tenant_id: "t1".into(),
                user_id: "u1".into(),
                title: "Hi".into(),
                content: String::new(),
                category: None,
                attachments: vec![],
                location: None,
                comments_count: 0,
                likes_count: 2,
                shares_count: 0,
                created_at: now,
                updated_at: now,
            },
            liked_by_me: true,
            favorited_by_me: None,
            distance_km: Some(1.5),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["_id"], "p1");
        assert_eq!(json["likesCount"], 2);
        assert_eq!(json["likedByMe"], true);
        assert_eq!(json["distanceKm"], 1.5);
        assert!(json.get("favoritedByMe").is_none());
    }
}
