//! Local-disk attachment storage and authenticated file serving.

use std::path::{Path, PathBuf};

use actix_files::NamedFile;
use actix_multipart::Field;
use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt;
use log::{debug, warn};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::Attachment;

const MAX_EXTENSION_LEN: usize = 10;

/// Reduces a client-supplied name to a single safe path component.
///
/// Only the final component survives, restricted to `[A-Za-z0-9._-]` with
/// leading dots removed, so the result can never leave the upload directory.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Randomised storage name that keeps a sanitised extension.
pub fn storage_name(original: Option<&str>) -> String {
    let extension = original
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| {
            ext.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(MAX_EXTENSION_LEN)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|ext| !ext.is_empty());

    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4().simple(), ext),
        None => Uuid::new_v4().simple().to_string(),
    }
}

/// Directory holding one tenant's uploads. The name is derived from the
/// tenant id so it is always a single safe path component.
pub fn tenant_dir(config: &Config, tenant_id: &str) -> PathBuf {
    let key = Uuid::new_v5(&Uuid::NAMESPACE_OID, tenant_id.as_bytes());
    config.upload_dir.join(key.simple().to_string())
}

/// Streams one multipart file field into the tenant's directory and
/// describes it. A failed upload leaves nothing behind.
pub async fn save_field(field: &mut Field, config: &Config, tenant_id: &str) -> ApiResult<Attachment> {
    let original_name = field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .map(str::to_string);
    let content_type = field.content_type().map(|mime| mime.to_string()).or_else(|| {
        original_name
            .as_deref()
            .and_then(|name| mime_guess::from_path(name).first())
            .map(|mime| mime.to_string())
    });

    let dir = tenant_dir(config, tenant_id);
    tokio::fs::create_dir_all(&dir).await?;
    let file_name = storage_name(original_name.as_deref());
    let path = dir.join(&file_name);
    let file = tokio::fs::File::create(&path).await?;

    let size = match write_field(field, file, config.max_upload_bytes).await {
        Ok(size) => size,
        Err(err) => {
            remove_quietly(&path).await;
            return Err(err);
        }
    };

    debug!("Stored upload {} ({} bytes) for tenant {}", file_name, size, tenant_id);
    Ok(Attachment {
        path: format!("uploads/{}", file_name),
        url: config.upload_url(&file_name),
        original_name,
        content_type,
        size: size as i64,
    })
}

async fn write_field(field: &mut Field, mut file: tokio::fs::File, max_bytes: usize) -> ApiResult<usize> {
    let mut size = 0usize;
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid upload: {}", e)))?
    {
        size += chunk.len();
        if size > max_bytes {
            return Err(ApiError::bad_request(format!("Attachment exceeds {} bytes", max_bytes)));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(size)
}

/// Local path for an attachment's relative `uploads/<name>` path.
pub fn local_path(config: &Config, tenant_id: &str, attachment: &Attachment) -> Option<PathBuf> {
    let name = attachment.path.rsplit('/').next()?;
    sanitize_file_name(name).map(|name| tenant_dir(config, tenant_id).join(name))
}

pub async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Could not remove upload {}: {}", path.display(), e);
    }
}

pub async fn remove_attachments(config: &Config, tenant_id: &str, attachments: &[Attachment]) {
    for attachment in attachments {
        if let Some(path) = local_path(config, tenant_id, attachment) {
            remove_quietly(&path).await;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub download: Option<String>,
}

impl DownloadQuery {
    fn wants_download(&self) -> bool {
        matches!(self.download.as_deref(), Some("1") | Some("true") | Some("yes"))
    }
}

/// GET /uploads/{name}
///
/// Only files in the caller's tenant are visible.
pub async fn serve_upload(
    auth: AuthUser,
    data: web::Data<AppState>,
    name: web::Path<String>,
    query: web::Query<DownloadQuery>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let file_name = sanitize_file_name(&name).ok_or(ApiError::NotFound("File not found"))?;
    let path = tenant_dir(&data.config, &auth.tenant_id).join(&file_name);

    let file = match NamedFile::open_async(&path).await {
        Ok(file) if file.metadata().is_file() => file,
        Ok(_) => return Err(ApiError::NotFound("File not found")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("File not found"))
        }
        Err(e) => return Err(e.into()),
    };

    let disposition = ContentDisposition {
        disposition: if query.wants_download() {
            DispositionType::Attachment
        } else {
            DispositionType::Inline
        },
        parameters: vec![DispositionParam::Filename(file_name)],
    };

    let mut response = file.set_content_disposition(disposition).into_response(&req);
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store, private"),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_multipart::Multipart;
    use actix_web::body::to_bytes;
    use actix_web::error::PayloadError;
    use actix_web::http::header::HeaderMap;
    use actix_web::test;
    use actix_web::web::Bytes;
    use futures_util::stream;
    use tempfile::TempDir;

    use crate::db::MongoDB;
    use crate::models::Role;

    #[::core::prelude::v1::test]
    fn traversal_names_collapse_to_last_component() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), Some("passwd".to_string()));
        assert_eq!(sanitize_file_name("..\\..\\boot.ini"), Some("boot.ini".to_string()));
        assert_eq!(sanitize_file_name("photo.png"), Some("photo.png".to_string()));
    }

    #[::core::prelude::v1::test]
    fn names_that_clean_to_nothing_are_rejected() {
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("../"), None);
        assert_eq!(sanitize_file_name("..."), None);
        assert_eq!(sanitize_file_name("%00"), Some("00".to_string()));
    }

    #[::core::prelude::v1::test]
    fn hidden_file_prefix_is_stripped() {
        assert_eq!(sanitize_file_name(".env"), Some("env".to_string()));
    }

    #[::core::prelude::v1::test]
    fn storage_name_keeps_a_clean_extension() {
        let name = storage_name(Some("My Photo.JPG"));
        assert!(name.ends_with(".jpg"));
        assert_eq!(name.len(), 32 + 4);

        let bare = storage_name(Some("README"));
        assert_eq!(bare.len(), 32);

        let odd = storage_name(Some("x.p/h\\p"));
        assert!(odd.ends_with(".php"));
    }

    #[::core::prelude::v1::test]
    fn local_path_stays_inside_the_tenant_dir() {
        let config = Config::new("mongodb://localhost:27017", "secret");
        let attachment = Attachment {
            path: "uploads/../../secret.txt".into(),
            url: String::new(),
            original_name: None,
            content_type: None,
            size: 0,
        };
        let path = local_path(&config, "t1", &attachment).unwrap();
        assert_eq!(path, tenant_dir(&config, "t1").join("secret.txt"));
    }

    #[::core::prelude::v1::test]
    fn tenants_get_distinct_single_component_dirs() {
        let config = Config::new("mongodb://localhost:27017", "secret");
        let a = tenant_dir(&config, "t1");
        let b = tenant_dir(&config, "t2");
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(config.upload_dir.as_path()));
        assert_eq!(a, tenant_dir(&config, "t1"));
    }

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::new("mongodb://127.0.0.1:1", "secret");
        config.upload_dir = dir.path().to_path_buf();
        config
    }

    fn member_of(tenant_id: &str) -> AuthUser {
        AuthUser {
            user_id: "u1".into(),
            tenant_id: tenant_id.into(),
            role: Role::Member,
            email: "a@b.com".into(),
            name: "Alice".into(),
        }
    }

    #[actix_web::test]
    async fn interrupted_upload_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("multipart/form-data; boundary=abc"),
        );
        let head = Bytes::from_static(
            b"--abc\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\npartial data that never finishes",
        );
        let chunks = vec![Ok::<_, PayloadError>(head), Err(PayloadError::Incomplete(None))];
        let mut multipart = Multipart::new(&headers, stream::iter(chunks));
        let mut field = multipart.try_next().await.unwrap().unwrap();

        assert!(save_field(&mut field, &config, "t1").await.is_err());
        let leftovers = std::fs::read_dir(tenant_dir(&config, "t1"))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[actix_web::test]
    async fn files_are_served_per_tenant_without_caching() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let own_dir = tenant_dir(&config, "t1");
        std::fs::create_dir_all(&own_dir).unwrap();
        std::fs::write(own_dir.join("note.txt"), b"hello").unwrap();

        let mongodb = MongoDB::connect(&config.mongo_uri, &config.database_name).await.unwrap();
        let data = web::Data::new(AppState::new(mongodb, config));
        let req = test::TestRequest::get().uri("/uploads/note.txt").to_http_request();

        let response = serve_upload(
            member_of("t1"),
            data.clone(),
            web::Path::from("note.txt".to_string()),
            web::Query(DownloadQuery { download: Some("yes".into()) }),
            req.clone(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), actix_web::http::StatusCode::OK);
        let cache = response.headers().get(header::CACHE_CONTROL).unwrap().to_str().unwrap();
        assert_eq!(cache, "no-store, private");
        let disposition = response.headers().get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap();
        assert!(disposition.starts_with("attachment"));
        let body = to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"hello");

        let other_tenant = serve_upload(
            member_of("t2"),
            data,
            web::Path::from("../t1/note.txt".to_string()),
            web::Query(DownloadQuery::default()),
            req,
        )
        .await;
        assert!(matches!(other_tenant, Err(ApiError::NotFound(_))));
    }
}
