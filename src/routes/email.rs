use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::WebhookEvent;
use crate::error::AppResult;
use crate::extractors::{AdminAccess, ApiKey};
use crate::providers::OutboundEmail;
use crate::state::AppState;
use crate::webhooks;

const RESEND_SOURCE: &str = "resend";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/send-email", post(send_email))
        .route("/api/v1/email/send", post(send_email_v1))
        .route(
            "/api/resend/webhook",
            post(resend_webhook).get(list_resend_events),
        )
}

async fn deliver(state: &AppState, email: OutboundEmail) -> AppResult<Json<Value>> {
    email.validate()?;
    let sent = state.email.send(&email).await?;
    tracing::info!(provider = %sent.provider, id = %sent.id, recipients = email.recipients().len(), "Email sent");
    Ok(Json(json!({
        "success": true,
        "id": sent.id,
        "provider": sent.provider,
    })))
}

async fn send_email(
    State(state): State<AppState>,
    Json(email): Json<OutboundEmail>,
) -> AppResult<Json<Value>> {
    deliver(&state, email).await
}

/// Same as `/api/send-email`, behind the API key.
async fn send_email_v1(
    State(state): State<AppState>,
    _key: ApiKey,
    Json(email): Json<OutboundEmail>,
) -> AppResult<Json<Value>> {
    deliver(&state, email).await
}

async fn resend_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    let event = webhooks::record_event(
        &state.db,
        RESEND_SOURCE,
        webhooks::resend_event_type(&payload),
        &payload,
    )?;
    Ok(Json(json!({ "received": true, "id": event.id })))
}

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    limit: Option<usize>,
}

impl ListQuery {
    pub(crate) fn limit(&self) -> usize {
        self.limit.unwrap_or(50).clamp(1, webhooks::MAX_LIST)
    }
}

async fn list_resend_events(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<WebhookEvent>>> {
    Ok(Json(webhooks::list_recent(&state.db, RESEND_SOURCE, query.limit())?))
}
