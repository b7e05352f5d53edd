use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures_util::TryStreamExt;
use log::{debug, info};
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{new_id, Chat, Message, MessageRead, User};
use crate::pagination::clamp_limit;
use crate::validation::{self, Issues};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub participant_ids: Vec<String>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
    /// Only messages strictly older than this epoch-millis timestamp.
    pub before: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub unread: bool,
}

/// The requester plus the requested ids, trimmed, sorted and de-duplicated,
/// so one pair of users always yields the same list.
pub fn chat_participants(requester: &str, requested: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = requested
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    ids.push(requester.to_string());
    ids.sort();
    ids.dedup();
    ids
}

/// A chat is unread when its newest message is later than the read marker;
/// a missing marker counts as the epoch.
pub fn is_unread(latest_message_ms: Option<i64>, last_read_ms: Option<i64>) -> bool {
    match latest_message_ms {
        Some(latest) => latest > last_read_ms.unwrap_or(0),
        None => false,
    }
}

async fn find_chat_for(data: &AppState, auth: &AuthUser, chat_id: &str) -> ApiResult<Chat> {
    let chat = data
        .mongodb
        .coll::<Chat>()
        .find_one(doc! { "tenantId": &auth.tenant_id, "_id": chat_id })
        .await?
        .ok_or(ApiError::NotFound("Chat not found"))?;
    if !chat.has_participant(&auth.user_id) {
        return Err(ApiError::Forbidden("Not a participant of this chat"));
    }
    Ok(chat)
}

/// POST /chats
///
/// Two participants and no title reuse the existing direct chat for the pair.
pub async fn create_chat(
    auth: AuthUser,
    data: web::Data<AppState>,
    body: web::Json<CreateChatRequest>,
) -> ApiResult<HttpResponse> {
    let participants = chat_participants(&auth.user_id, &body.participant_ids);
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let mut issues = Issues::new();
    issues
        .check(participants.len() >= 2, "participantIds", "must name at least one other user")
        .check(
            title.as_deref().map_or(true, |t| validation::len_between(t, 1, 100)),
            "title",
            "must be at most 100 characters",
        );
    issues.finish()?;

    let known = data
        .mongodb
        .coll::<User>()
        .count_documents(doc! { "tenantId": &auth.tenant_id, "userId": { "$in": &participants } })
        .await?;
    if known != participants.len() as u64 {
        return Err(ApiError::bad_request("Unknown participant"));
    }

    let chats = data.mongodb.coll::<Chat>();
    let is_group = participants.len() > 2 || title.is_some();
    if !is_group {
        if let Some(existing) = chats
            .find_one(doc! {
                "tenantId": &auth.tenant_id,
                "isGroup": false,
                "participantIds": &participants,
            })
            .await?
        {
            debug!("Reusing direct chat {}", existing.id);
            return Ok(HttpResponse::Ok().json(existing));
        }
    }

    let now = Utc::now();
    let chat = Chat {
        id: new_id(),
        tenant_id: auth.tenant_id.clone(),
        is_group,
        participant_ids: participants,
        title,
        created_by: auth.user_id.clone(),
        created_at: now,
        last_message_at: now,
    };
    chats.insert_one(&chat).await?;

    info!("Chat {} created by {} (group: {})", chat.id, auth.user_id, chat.is_group);
    Ok(HttpResponse::Created().json(chat))
}

/// GET /chats
pub async fn list_chats(auth: AuthUser, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let chats: Vec<Chat> = data
        .mongodb
        .coll::<Chat>()
        .find(doc! { "tenantId": &auth.tenant_id, "participantIds": &auth.user_id })
        .sort(doc! { "lastMessageAt": -1 })
        .await?
        .try_collect()
        .await?;
    if chats.is_empty() {
        return Ok(HttpResponse::Ok().json(Vec::<ChatSummary>::new()));
    }
    let chat_ids: Vec<&str> = chats.iter().map(|c| c.id.as_str()).collect();

    let latest_rows: Vec<Document> = data
        .mongodb
        .coll::<Message>()
        .aggregate(vec![
            doc! { "$match": { "tenantId": &auth.tenant_id, "chatId": { "$in": &chat_ids } } },
            doc! { "$group": { "_id": "$chatId", "latest": { "$max": "$createdAt" } } },
        ])
        .await?
        .try_collect()
        .await?;
    let latest: HashMap<String, i64> = latest_rows
        .iter()
        .filter_map(|row| Some((row.get_str("_id").ok()?.to_string(), row.get_i64("latest").ok()?)))
        .collect();

    let markers: Vec<MessageRead> = data
        .mongodb
        .coll::<MessageRead>()
        .find(doc! {
            "tenantId": &auth.tenant_id,
            "userId": &auth.user_id,
            "chatId": { "$in": &chat_ids },
        })
        .await?
        .try_collect()
        .await?;
    let read: HashMap<String, i64> = markers
        .into_iter()
        .map(|m| (m.chat_id, m.last_read_at.timestamp_millis()))
        .collect();

    let summaries: Vec<ChatSummary> = chats
        .into_iter()
        .map(|chat| {
            let unread = is_unread(latest.get(&chat.id).copied(), read.get(&chat.id).copied());
            ChatSummary { chat, unread }
        })
        .collect();
    Ok(HttpResponse::Ok().json(summaries))
}

/// POST /chats/{id}/messages
pub async fn send_message(
    auth: AuthUser,
    data: web::Data<AppState>,
    chat_id: web::Path<String>,
    body: web::Json<SendMessageRequest>,
) -> ApiResult<HttpResponse> {
    let mut issues = Issues::new();
    issues.check(validation::len_between(&body.text, 1, 4000), "text", "must be 1-4000 characters");
    issues.finish()?;

    let chat = find_chat_for(&data, &auth, &chat_id).await?;
    let message = Message {
        id: new_id(),
        tenant_id: auth.tenant_id.clone(),
        chat_id: chat.id.clone(),
        sender_id: auth.user_id.clone(),
        text: body.text.trim().to_string(),
        created_at: Utc::now(),
    };
    data.mongodb.coll::<Message>().insert_one(&message).await?;
    data.mongodb
        .coll::<Chat>()
        .update_one(
            doc! { "tenantId": &auth.tenant_id, "_id": &chat.id },
            doc! { "$set": { "lastMessageAt": message.created_at.timestamp_millis() } },
        )
        .await?;

    Ok(HttpResponse::Created().json(message))
}

/// GET /chats/{id}/messages
///
/// Returns the newest page oldest-first and moves the caller's read marker
/// to now.
pub async fn list_messages(
    auth: AuthUser,
    data: web::Data<AppState>,
    chat_id: web::Path<String>,
    query: web::Query<MessagesQuery>,
) -> ApiResult<HttpResponse> {
    let chat = find_chat_for(&data, &auth, &chat_id).await?;

    let mut filter = doc! { "tenantId": &auth.tenant_id, "chatId": &chat.id };
    if let Some(before) = query.before {
        filter.insert("createdAt", doc! { "$lt": before });
    }
    let mut messages: Vec<Message> = data
        .mongodb
        .coll::<Message>()
        .find(filter)
        .sort(doc! { "createdAt": -1 })
        .limit(clamp_limit(query.limit))
        .await?
        .try_collect()
        .await?;
    messages.reverse();

    data.mongodb
        .coll::<MessageRead>()
        .update_one(
            doc! { "tenantId": &auth.tenant_id, "chatId": &chat.id, "userId": &auth.user_id },
            doc! { "$set": { "lastReadAt": Utc::now().timestamp_millis() } },
        )
        .upsert(true)
        .await?;

    Ok(HttpResponse::Ok().json(messages))
}
