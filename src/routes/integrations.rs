use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::extractors::AdminAccess;
use crate::providers::DnsRecord;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/eventbrite/events", post(eventbrite_events))
        .route("/api/eventbrite/attendees", post(eventbrite_attendees))
        .route("/api/ai/generate", post(generate))
        .route("/api/domains/records", post(upsert_dns_record))
}

fn required<'a>(value: &'a Option<String>, field: &str) -> AppResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing required field: {}", field)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsRequest {
    token: Option<String>,
    organization_id: Option<String>,
}

async fn eventbrite_events(
    State(state): State<AppState>,
    Json(req): Json<EventsRequest>,
) -> AppResult<Json<Value>> {
    let token = required(&req.token, "token")?;
    let organization_id = req
        .organization_id
        .as_deref()
        .map(str::trim)
        .filter(|o| !o.is_empty());
    Ok(Json(state.eventbrite.list_events(token, organization_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendeesRequest {
    token: Option<String>,
    event_id: Option<String>,
}

async fn eventbrite_attendees(
    State(state): State<AppState>,
    Json(req): Json<AttendeesRequest>,
) -> AppResult<Json<Value>> {
    let token = required(&req.token, "token")?;
    let event_id = required(&req.event_id, "eventId")?;
    Ok(Json(state.eventbrite.list_attendees(token, event_id).await?))
}

#[derive(Deserialize)]
struct GenerateRequest {
    prompt: Option<String>,
    context: Option<String>,
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> AppResult<Json<Value>> {
    let prompt = required(&req.prompt, "prompt")?;
    let gemini = state
        .gemini
        .as_ref()
        .ok_or(AppError::NotConfigured("GEMINI_API_KEY"))?;

    let full_prompt = match req.context.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("{}\n\n{}", context, prompt),
        None => prompt.to_string(),
    };
    let text = gemini.generate(&full_prompt).await?;
    Ok(Json(json!({ "text": text })))
}

async fn upsert_dns_record(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Json(record): Json<DnsRecord>,
) -> AppResult<Json<Value>> {
    record.validate().map_err(AppError::BadRequest)?;
    let godaddy = state
        .godaddy
        .as_ref()
        .ok_or(AppError::NotConfigured("GO_DADDY_API_KEY"))?;

    godaddy.upsert_record(&record).await?;
    tracing::info!(domain = %record.domain, record_type = %record.record_type, name = %record.name, "DNS record updated");
    Ok(Json(json!({ "success": true })))
}
