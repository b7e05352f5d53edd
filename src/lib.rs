pub mod app_state;
pub mod auth;
pub mod chat;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod geo;
pub mod groups;
pub mod invitations;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod posts;
pub mod profile;
pub mod reactions;
pub mod security;
pub mod uploads;
pub mod validation;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::ApiError;
use crate::middleware::Authentication;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Registers every route. Everything outside `/health` and `/auth` sits
/// behind [`Authentication`].
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::bad_request(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::bad_request(err.to_string()).into()),
    )
    .route("/health", web::get().to(health))
    .service(
        web::scope("/auth")
            .route("/signup", web::post().to(auth::signup))
            .route("/login", web::post().to(auth::login))
            .route("/password-reset/request", web::post().to(auth::request_password_reset))
            .route("/password-reset/confirm", web::post().to(auth::confirm_password_reset))
            .route("/email-verification/resend", web::post().to(auth::resend_verification))
            .route("/email-verification/confirm", web::post().to(auth::confirm_verification)),
    )
    .service(
        web::scope("")
            .wrap(Authentication)
            .service(
                web::resource("/me")
                    .route(web::get().to(profile::get_me))
                    .route(web::patch().to(profile::update_me)),
            )
            .route("/uploads/{name}", web::get().to(uploads::serve_upload))
            // POSTS
            .service(
                web::scope("/posts")
                    .route("", web::post().to(posts::create_post))
                    .route("", web::get().to(posts::list_posts))
                    .service(
                        web::scope("/{post_id}")
                            .route("", web::get().to(posts::get_post))
                            .route("", web::patch().to(posts::update_post))
                            .route("", web::delete().to(posts::delete_post))
                            .route("/comments", web::post().to(comments::create_comment))
                            .route("/comments", web::get().to(comments::list_comments))
                            .route("/comments/{comment_id}", web::delete().to(comments::delete_comment))
                            .route("/like", web::post().to(reactions::like_post))
                            .route("/like", web::delete().to(reactions::unlike_post))
                            .route("/favorite", web::post().to(reactions::favorite_post))
                            .route("/favorite", web::delete().to(reactions::unfavorite_post))
                            .route("/share", web::post().to(reactions::share_post)),
                    ),
            )
            // GROUPS
            .service(
                web::scope("/groups")
                    .route("", web::post().to(groups::create_group))
                    .route("", web::get().to(groups::list_groups))
                    .route("/{group_id}/join", web::post().to(groups::join_group))
                    .route("/{group_id}/members", web::get().to(groups::list_members)),
            )
            // EVENTS
            .service(
                web::scope("/events")
                    .route("", web::post().to(events::create_event))
                    .route("", web::get().to(events::list_events))
                    .route("/{event_id}", web::get().to(events::get_event))
                    .route("/{event_id}/rsvp", web::post().to(events::rsvp_event)),
            )
            // INVITATIONS
            .service(
                web::scope("/invitations")
                    .route("", web::post().to(invitations::create_invitation))
                    .route("/accept", web::post().to(invitations::accept_invitation)),
            )
            // CHATS
            .service(
                web::scope("/chats")
                    .route("", web::post().to(chat::create_chat))
                    .route("", web::get().to(chat::list_chats))
                    .route("/{chat_id}/messages", web::post().to(chat::send_message))
                    .route("/{chat_id}/messages", web::get().to(chat::list_messages)),
            ),
    );
}
