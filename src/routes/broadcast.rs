use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::communities::require_manager;
use crate::broadcast::templates::{self, NewTemplate};
use crate::broadcast::{self, BroadcastReport, BroadcastRequest, Message};
use crate::community::{self, members};
use crate::db::models::BroadcastTemplate;
use crate::error::{AppError, AppResult};
use crate::extractors::{AnyUser, DashboardUser};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/broadcast-templates",
            get(list_templates).post(create_template),
        )
        .route("/api/broadcast-templates/{id}", delete(delete_template))
        .route("/api/communities/{handle}/broadcast", post(send))
}

async fn list_templates(
    State(state): State<AppState>,
    _user: DashboardUser,
) -> AppResult<Json<Vec<BroadcastTemplate>>> {
    Ok(Json(templates::list_templates(&state.db)?))
}

async fn create_template(
    State(state): State<AppState>,
    _user: DashboardUser,
    Json(new): Json<NewTemplate>,
) -> AppResult<(StatusCode, Json<BroadcastTemplate>)> {
    let template = templates::create_template(&state.db, new)?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn delete_template(
    State(state): State<AppState>,
    _user: DashboardUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    if !templates::delete_template(&state.db, &id)? {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "success": true })))
}

/// Explicit subject and message win over the template's.
fn resolve_message(state: &AppState, req: BroadcastRequest) -> AppResult<Message> {
    let (mut subject, mut body) = (req.subject, req.message);
    if let Some(id) = req.template_id.as_deref().filter(|id| !id.trim().is_empty()) {
        let template = templates::get_template(&state.db, id)?.ok_or(AppError::NotFound)?;
        subject = subject.or(template.subject);
        body = body.or(Some(template.message));
    }
    Message::new(req.channel, subject, body)
}

async fn send(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path(handle): Path<String>,
    Json(mut req): Json<BroadcastRequest>,
) -> AppResult<Json<BroadcastReport>> {
    let community = community::require_community(&state.db, &handle)?;
    require_manager(&state, &user.id, &community)?;

    let channel = req.channel;
    let wanted: Option<HashSet<String>> = req.member_ids.take().map(|ids| ids.into_iter().collect());
    let message = resolve_message(&state, req)?;

    let recipients: Vec<_> = members::list_members_enriched(&state.db, &community.id)?
        .into_iter()
        .filter(|m| {
            wanted
                .as_ref()
                .map(|ids| ids.contains(&m.member.user_id))
                .unwrap_or(true)
        })
        .collect();
    tracing::info!(community_id = %community.id, ?channel, recipients = recipients.len(), sender = %user.id, "Starting broadcast");

    let report = broadcast::send_broadcast(
        state.email.as_ref(),
        state.whatsapp.as_ref(),
        channel,
        &message,
        recipients,
    )
    .await;
    Ok(Json(report))
}
