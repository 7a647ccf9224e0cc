use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::access::{self, AccessRequestInput, AccessSource, Decision, DecisionTarget};
use crate::db::models::AccessRequest;
use crate::error::{AppError, AppResult};
use crate::extractors::AdminAccess;
use crate::providers::OutboundEmail;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/send-invite", post(send_invite))
        .route("/api/waitlist", get(list_waitlist))
        .route("/api/waitlist/add-to-waitlist", post(add_to_waitlist))
        .route("/api/waitlist/approve", post(approve))
        .route("/api/waitlist/reject", post(reject))
}

fn requested(request: AccessRequest, created: bool) -> Response {
    if created {
        (StatusCode::CREATED, Json(json!({ "request": request }))).into_response()
    } else {
        Json(json!({ "request": request, "alreadyRequested": true })).into_response()
    }
}

async fn send_invite(
    State(state): State<AppState>,
    Json(input): Json<AccessRequestInput>,
) -> AppResult<Response> {
    let (request, created) = access::request_access(&state.db, AccessSource::Invite, input)?;
    Ok(requested(request, created))
}

async fn add_to_waitlist(
    State(state): State<AppState>,
    Json(input): Json<AccessRequestInput>,
) -> AppResult<Response> {
    let (request, created) = access::request_access(&state.db, AccessSource::Waitlist, input)?;
    Ok(requested(request, created))
}

fn notification(request: &AccessRequest, decision: Decision) -> OutboundEmail {
    let greeting = match &request.first_name {
        Some(name) => format!("Hi {},", name),
        None => "Hi,".to_string(),
    };
    let (subject, body) = match decision {
        Decision::Approved => (
            "You're in: welcome to Kyozo",
            "Your request to join Kyozo has been approved. You can now sign up with this email address.",
        ),
        Decision::Rejected => (
            "Your Kyozo access request",
            "Thank you for your interest in Kyozo. We are unable to offer you access at this time.",
        ),
    };
    OutboundEmail::new(&request.email, subject, format!("{}\n\n{}\n\nThe Kyozo team", greeting, body))
}

/// The status change stands even when the notification cannot be delivered.
async fn decide(state: &AppState, target: DecisionTarget, decision: Decision) -> AppResult<Response> {
    let request = access::decide(&state.db, &target, decision)?.ok_or(AppError::NotFound)?;

    let email_sent = match state.email.send(&notification(&request, decision)).await {
        Ok(sent) => {
            tracing::debug!(email = %request.email, id = %sent.id, "Decision email sent");
            true
        }
        Err(e) => {
            tracing::warn!(email = %request.email, status = decision.as_str(), "Failed to send decision email: {}", e);
            false
        }
    };
    Ok(Json(json!({ "request": request, "emailSent": email_sent })).into_response())
}

async fn approve(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Json(target): Json<DecisionTarget>,
) -> AppResult<Response> {
    decide(&state, target, Decision::Approved).await
}

async fn reject(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Json(target): Json<DecisionTarget>,
) -> AppResult<Response> {
    decide(&state, target, Decision::Rejected).await
}

#[derive(Deserialize)]
struct WaitlistQuery {
    status: Option<String>,
}

async fn list_waitlist(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Query(query): Query<WaitlistQuery>,
) -> AppResult<Json<Vec<AccessRequest>>> {
    let status = query.status.as_deref().map(str::trim).filter(|s| !s.is_empty());
    Ok(Json(access::list_requests(&state.db, status)?))
}
