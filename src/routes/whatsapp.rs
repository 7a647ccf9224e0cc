use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::email::ListQuery;
use crate::db::models::WebhookEvent;
use crate::error::{AppError, AppResult};
use crate::extractors::AdminAccess;
use crate::state::AppState;
use crate::webhooks;

const WHATSAPP_SOURCE: &str = "whatsapp";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/whatsapp/webhook",
            post(whatsapp_webhook).get(list_whatsapp_events),
        )
        .route("/api/whatsapp/media/{media_id}", get(media))
}

async fn whatsapp_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    let event = webhooks::record_event(
        &state.db,
        WHATSAPP_SOURCE,
        webhooks::whatsapp_event_type(&payload),
        &payload,
    )?;
    Ok(Json(json!({ "received": true, "id": event.id })))
}

async fn list_whatsapp_events(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<WebhookEvent>>> {
    Ok(Json(webhooks::list_recent(&state.db, WHATSAPP_SOURCE, query.limit())?))
}

/// Proxy a media object so the browser never sees the provider credentials.
async fn media(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
) -> AppResult<Response> {
    let media_id = media_id.trim();
    if media_id.is_empty() {
        return Err(AppError::BadRequest("Missing required field: mediaId".into()));
    }
    let blob = state.whatsapp.fetch_media(media_id).await?;
    tracing::debug!(media_id, size = blob.data.len(), content_type = %blob.content_type, "WhatsApp media fetched");
    Ok(([(header::CONTENT_TYPE, blob.content_type)], blob.data).into_response())
}
