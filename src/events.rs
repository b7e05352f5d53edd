use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use futures_util::TryStreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::ReturnDocument;
use serde::{de, Deserialize, Deserializer};
use serde_json::json;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::groups::find_group;
use crate::middleware::AuthUser;
use crate::models::{new_id, Event, EventRsvp, RsvpStatus};
use crate::pagination::PageQuery;
use crate::validation::{self, Issues};

/// Listing window when the client gives no range.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Event times arrive either as epoch milliseconds, the form every response
/// uses, or as RFC 3339 text.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl RawTimestamp {
    fn into_datetime<E: de::Error>(self) -> Result<DateTime<Utc>, E> {
        match self {
            RawTimestamp::Millis(ms) => {
                DateTime::from_timestamp_millis(ms).ok_or_else(|| E::custom("timestamp out of range"))
            }
            RawTimestamp::Text(text) => {
                let text = text.trim();
                match text.parse::<i64>() {
                    Ok(ms) => RawTimestamp::Millis(ms).into_datetime(),
                    Err(_) => DateTime::parse_from_rfc3339(text)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| E::custom(format!("invalid timestamp {:?}: {}", text, e))),
                }
            }
        }
    }
}

fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    RawTimestamp::deserialize(deserializer)?.into_datetime()
}

fn optional_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    Option::<RawTimestamp>::deserialize(deserializer)?
        .map(RawTimestamp::into_datetime)
        .transpose()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(deserialize_with = "timestamp")]
    pub starts_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp")]
    pub ends_at: DateTime<Utc>,
    pub group_id: Option<String>,
}

impl CreateEventRequest {
    fn validate(&self) -> ApiResult<()> {
        let mut issues = Issues::new();
        issues
            .check(validation::len_between(&self.title, 1, 200), "title", "must be 1-200 characters")
            .check(self.ends_at >= self.starts_at, "endsAt", "must not be before startsAt")
            .check(
                self.description.as_deref().map_or(true, |d| d.chars().count() <= 5000),
                "description",
                "must be at most 5000 characters",
            );
        issues.finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsQuery {
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub to: Option<DateTime<Utc>>,
    pub group_id: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<i64>,
}

impl ListEventsQuery {
    fn page(&self) -> PageQuery {
        PageQuery { page: self.page, limit: self.limit }
    }
}

/// `[from, to]` for event listing; missing ends default around `now`.
pub fn event_window(query: &ListEventsQuery, now: DateTime<Utc>) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
    let (from, to) = match (query.from, query.to) {
        (Some(from), Some(to)) => (from, to),
        (Some(from), None) => (from, from + Duration::days(DEFAULT_WINDOW_DAYS)),
        (None, Some(to)) => (to - Duration::days(DEFAULT_WINDOW_DAYS), to),
        (None, None) => (now, now + Duration::days(DEFAULT_WINDOW_DAYS)),
    };
    if to < from {
        return Err(ApiError::Validation(vec![crate::error::FieldIssue::new(
            "to",
            "must not be before from",
        )]));
    }
    Ok((from, to))
}

async fn find_event(data: &AppState, auth: &AuthUser, event_id: &str) -> ApiResult<Event> {
    data.mongodb
        .coll::<Event>()
        .find_one(doc! { "tenantId": &auth.tenant_id, "_id": event_id })
        .await?
        .ok_or(ApiError::NotFound("Event not found"))
}

/// POST /events
pub async fn create_event(
    auth: AuthUser,
    data: web::Data<AppState>,
    body: web::Json<CreateEventRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    let body = body.into_inner();

    let group_id = match body.group_id.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        Some(group_id) => Some(find_group(&data, &auth, group_id).await?.id),
        None => None,
    };

    let event = Event {
        id: new_id(),
        tenant_id: auth.tenant_id.clone(),
        title: body.title.trim().to_string(),
        description: body.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
        starts_at: body.starts_at,
        ends_at: body.ends_at,
        group_id,
        created_by: auth.user_id.clone(),
        created_at: Utc::now(),
    };
    data.mongodb.coll::<Event>().insert_one(&event).await?;

    info!("Event {} created by {}", event.id, auth.user_id);
    Ok(HttpResponse::Created().json(event))
}

/// GET /events
///
/// Events starting inside the window, soonest first, one page at a time.
pub async fn list_events(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ListEventsQuery>,
) -> ApiResult<HttpResponse> {
    let (from, to) = event_window(&query, Utc::now())?;
    let mut filter = doc! {
        "tenantId": &auth.tenant_id,
        "startsAt": { "$gte": from.timestamp_millis(), "$lte": to.timestamp_millis() },
    };
    if let Some(group_id) = query.group_id.as_deref().filter(|g| !g.is_empty()) {
        filter.insert("groupId", group_id);
    }

    let events: Vec<Event> = data
        .mongodb
        .coll::<Event>()
        .find(filter)
        .sort(doc! { "startsAt": 1, "_id": 1 })
        .skip(query.page().skip())
        .limit(query.page().limit())
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(events))
}

/// GET /events/{id}
///
/// The event plus how many members answered each RSVP status.
pub async fn get_event(
    auth: AuthUser,
    data: web::Data<AppState>,
    event_id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let event = find_event(&data, &auth, &event_id).await?;

    let pipeline = vec![
        doc! { "$match": { "tenantId": &auth.tenant_id, "eventId": &event.id } },
        doc! { "$group": { "_id": "$status", "count": { "$sum": 1 } } },
    ];
    let rows: Vec<Document> = data
        .mongodb
        .coll::<EventRsvp>()
        .aggregate(pipeline)
        .await?
        .try_collect()
        .await?;

    let mut counts: HashMap<&'static str, i64> = RsvpStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    for row in rows {
        let status = row.get_str("_id").unwrap_or_default();
        let count = row.get_i32("count").map(i64::from).or_else(|_| row.get_i64("count")).unwrap_or(0);
        if let Some(slot) = RsvpStatus::ALL.iter().find(|s| s.as_str() == status) {
            counts.insert(slot.as_str(), count);
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "event": event, "rsvpCounts": counts })))
}

#[derive(Debug, Deserialize)]
pub struct RsvpRequest {
    pub status: RsvpStatus,
}

/// POST /events/{id}/rsvp
///
/// Upserts by (event, user); the latest answer wins.
pub async fn rsvp_event(
    auth: AuthUser,
    data: web::Data<AppState>,
    event_id: web::Path<String>,
    body: web::Json<RsvpRequest>,
) -> ApiResult<HttpResponse> {
    let event = find_event(&data, &auth, &event_id).await?;
    let status = to_bson(&body.status).map_err(ApiError::internal)?;

    let rsvp = data
        .mongodb
        .coll::<EventRsvp>()
        .find_one_and_update(
            doc! { "tenantId": &auth.tenant_id, "eventId": &event.id, "userId": &auth.user_id },
            doc! { "$set": { "status": status, "updatedAt": Utc::now().timestamp_millis() } },
        )
        .upsert(true)
        .return_document(ReturnDocument::After)
        .await?
        .ok_or_else(|| ApiError::internal("upsert returned no document"))?;

    Ok(HttpResponse::Ok().json(rsvp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn default_window_starts_now() {
        let now = at(1);
        let (from, to) = event_window(&ListEventsQuery::default(), now).unwrap();
        assert_eq!(from, now);
        assert_eq!(to, now + Duration::days(DEFAULT_WINDOW_DAYS));
    }

    #[test]
    fn explicit_range_is_kept() {
        let query = ListEventsQuery {
            from: Some(at(2)),
            to: Some(at(5)),
            ..Default::default()
        };
        assert_eq!(event_window(&query, at(1)).unwrap(), (at(2), at(5)));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let query = ListEventsQuery {
            from: Some(at(5)),
            to: Some(at(2)),
            ..Default::default()
        };
        assert!(event_window(&query, at(1)).is_err());
    }

    #[test]
    fn rsvp_status_is_an_enum() {
        let ok: RsvpRequest = serde_json::from_str(r#"{"status":"maybe"}"#).unwrap();
        assert_eq!(ok.status, RsvpStatus::Maybe);
        assert!(serde_json::from_str::<RsvpRequest>(r#"{"status":"perhaps"}"#).is_err());
    }

    #[test]
    fn ends_before_start_fails_validation() {
        let request = CreateEventRequest {
            title: "Meetup".into(),
            description: None,
            starts_at: at(3),
            ends_at: at(2),
            group_id: None,
        };
        assert!(matches!(request.validate(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn event_times_accept_the_millis_they_are_returned_as() {
        let start = at(3).timestamp_millis();
        let body = json!({
            "title": "Meetup",
            "startsAt": start,
            "endsAt": "2026-03-03T14:00:00Z",
        });
        let request: CreateEventRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.starts_at, at(3));
        assert_eq!(request.ends_at, at(3) + Duration::hours(2));

        let echoed: CreateEventRequest =
            serde_json::from_value(json!({ "title": "Again", "startsAt": start.to_string(), "endsAt": start })).unwrap();
        assert_eq!(echoed.starts_at, echoed.ends_at);

        assert!(serde_json::from_value::<CreateEventRequest>(
            json!({ "title": "Bad", "startsAt": "next tuesday", "endsAt": start })
        )
        .is_err());
    }

    #[test]
    fn listing_query_takes_millis_and_pages() {
        let uri = format!("from={}&groupId=g1&page=3&limit=10", at(2).timestamp_millis());
        let query = web::Query::<ListEventsQuery>::from_query(&uri).unwrap();
        assert_eq!(query.from, Some(at(2)));
        assert_eq!(query.to, None);
        assert_eq!(query.group_id.as_deref(), Some("g1"));
        assert_eq!(query.page().skip(), 20);
        assert_eq!(query.page().limit(), 10);

        let text = web::Query::<ListEventsQuery>::from_query("to=2026-03-05T12:00:00Z").unwrap();
        assert_eq!(text.to, Some(at(5)));
        assert_eq!(text.page().skip(), 0);
    }
}
