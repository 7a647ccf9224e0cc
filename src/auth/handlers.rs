//! Sign-up, sign-in and session handlers. Each handler is generic over the
//! realm so the dashboard and community prefixes share one implementation.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::one_time::{self, Purpose};
use super::{looks_like_email, normalize_email, password, session, Realm, RealmKind};
use crate::community::{self, members, Role};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::extractors::{cookie_name, realm_token};
use crate::live::FilterKey;
use crate::providers::OutboundEmail;
use crate::state::AppState;
use crate::users::{self, NewUser};

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ConfirmResetRequest {
    pub token: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkRequest {
    pub email: String,
    pub community_handle: Option<String>,
}

#[derive(Deserialize)]
pub struct CompleteMagicLinkRequest {
    pub token: String,
    pub email: Option<String>,
}

// -- Helpers --

fn checked_email(raw: &str) -> AppResult<String> {
    let email = normalize_email(raw);
    if email.is_empty() {
        return Err(AppError::BadRequest("Missing required field: email".into()));
    }
    if !looks_like_email(&email) {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }
    Ok(email)
}

/// Start a session and answer with its cookie plus the user and token.
fn session_response(
    state: &AppState,
    realm: Realm,
    user: &crate::db::models::User,
    status: StatusCode,
    extra: serde_json::Value,
) -> AppResult<Response> {
    let hours = state.config.auth.session_hours;
    let token = session::create_session(&state.db, &user.id, realm, hours)?;
    let cookie = session::session_cookie(cookie_name(state, realm), &token, hours);

    let mut body = json!({ "user": user, "token": token });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        body.extend(extra.clone());
    }
    Ok((status, AppendHeaders([(header::SET_COOKIE, cookie)]), Json(body)).into_response())
}

fn link(state: &AppState, path: &str, token: &str) -> AppResult<String> {
    let mut url = url::Url::parse(&state.config.server.site_url)
        .and_then(|base| base.join(path))
        .map_err(|e| AppError::Internal(format!("bad site_url: {}", e)))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.to_string())
}

// -- Password flows --

/// POST /api/{auth,community-auth}/signup
pub async fn sign_up<R: RealmKind>(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> AppResult<Response> {
    let email = checked_email(&req.email)?;
    let new = NewUser {
        email,
        display_name: req.display_name.filter(|n| !n.trim().is_empty()),
        phone: req.phone.filter(|p| !p.trim().is_empty()),
        password_hash: None,
    };

    let pool = state.db.clone();
    let cost = state.config.auth.bcrypt_cost;
    let user = db::blocking(move || password::sign_up(&pool, new, &req.password, cost)).await?;

    tracing::info!(user_id = %user.id, realm = R::REALM.as_str(), "User signed up");
    session_response(&state, R::REALM, &user, StatusCode::CREATED, json!({}))
}

/// POST /api/{auth,community-auth}/signin
pub async fn sign_in<R: RealmKind>(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> AppResult<Response> {
    let email = normalize_email(&req.email);
    let pool = state.db.clone();
    let user = db::blocking(move || password::sign_in(&pool, &email, &req.password)).await?;

    tracing::info!(user_id = %user.id, realm = R::REALM.as_str(), "User signed in");
    session_response(&state, R::REALM, &user, StatusCode::OK, json!({}))
}

/// POST /api/{auth,community-auth}/signout
pub async fn sign_out<R: RealmKind>(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Response> {
    if let Some(token) = realm_token(&state, &headers, R::REALM) {
        session::delete_session(&state.db, token)?;
    }
    let cookie = session::clear_cookie(cookie_name(&state, R::REALM));
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(json!({ "success": true })),
    )
        .into_response())
}

/// GET /api/{auth,community-auth}/me. `{"user": null}` when signed out.
pub async fn me<R: RealmKind>(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let user = match realm_token(&state, &headers, R::REALM) {
        Some(token) => match session::lookup_session(&state.db, token, R::REALM)? {
            Some(session_user) => users::get_user(&state.db, &session_user.id)?,
            None => None,
        },
        None => None,
    };
    Ok(Json(json!({ "user": user })))
}

/// POST /api/{auth,community-auth}/reset-password. Always reports success so
/// the response never reveals whether an account exists.
pub async fn reset_password<R: RealmKind>(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let email = checked_email(&req.email)?;

    if users::get_user_by_email(&state.db, &email)?.is_some() {
        let token = one_time::issue(
            &state.db,
            &email,
            Purpose::PasswordReset,
            None,
            state.config.auth.reset_link_minutes,
        )?;
        let path = match R::REALM {
            Realm::Main => "reset-password",
            Realm::Community => "community/reset-password",
        };
        let url = link(&state, path, &token)?;
        let message = OutboundEmail::new(
            email.clone(),
            "Reset your Kyozo password",
            format!(
                "Someone asked to reset the password for this address.\n\nReset it here: {}\n\nIf it wasn't you, ignore this email.",
                url
            ),
        );
        if let Err(e) = state.email.send(&message).await {
            tracing::warn!(email = %email, "Password reset email failed: {}", e);
        }
    } else {
        tracing::debug!(email = %email, "Password reset requested for unknown address");
    }

    Ok(Json(json!({ "sent": true })))
}

/// POST /api/{auth,community-auth}/reset-password/confirm
pub async fn confirm_reset<R: RealmKind>(
    State(state): State<AppState>,
    Json(req): Json<ConfirmResetRequest>,
) -> AppResult<Json<serde_json::Value>> {
    // Check the new password first so a typo does not burn the link.
    password::validate_password(&req.password)?;
    let redeemed = one_time::redeem(&state.db, &req.token, Purpose::PasswordReset)?;
    let user = users::get_user_by_email(&state.db, &redeemed.email)?
        .ok_or_else(|| AppError::BadRequest("This link is invalid or has expired".into()))?;

    let cost = state.config.auth.bcrypt_cost;
    let hash = db::blocking(move || password::hash_password(&req.password, cost)).await?;
    users::set_password_hash(&state.db, &user.id, &hash)?;
    let dropped = session::delete_user_sessions(&state.db, &user.id)?;

    tracing::info!(user_id = %user.id, sessions_dropped = dropped, "Password reset");
    Ok(Json(json!({ "success": true })))
}

// -- Passwordless community sign-in --

/// POST /api/community-auth/magic-link
pub async fn request_magic_link(
    State(state): State<AppState>,
    Json(req): Json<MagicLinkRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let email = checked_email(&req.email)?;
    let handle = req
        .community_handle
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty());

    let community = match &handle {
        Some(h) => Some(
            community::get_community_by_handle(&state.db, h)?
                .ok_or_else(|| AppError::BadRequest(format!("Unknown community: {}", h)))?,
        ),
        None => None,
    };

    let token = one_time::issue(
        &state.db,
        &email,
        Purpose::MagicLink,
        handle.as_deref(),
        state.config.auth.magic_link_minutes,
    )?;
    let (url, subject) = match &community {
        Some(c) => (
            link(&state, &format!("c/{}/join", c.handle), &token)?,
            format!("Your link to join {}", c.name),
        ),
        None => (link(&state, "join", &token)?, "Your Kyozo sign-in link".to_string()),
    };

    let message = OutboundEmail::new(
        email.clone(),
        subject,
        format!(
            "Use this link to sign in. It expires in {} minutes and works once.\n\n{}",
            state.config.auth.magic_link_minutes, url
        ),
    );
    let sent = state.email.send(&message).await?;

    tracing::info!(email = %email, community = ?handle, provider = %sent.provider, "Magic link sent");
    Ok(Json(json!({ "sent": true })))
}

/// POST /api/community-auth/magic-link/complete
pub async fn complete_magic_link(
    State(state): State<AppState>,
    Json(req): Json<CompleteMagicLinkRequest>,
) -> AppResult<Response> {
    let email = req
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest("Please provide the email address the link was sent to".into())
        })?;

    let redeemed = one_time::redeem_for_email(&state.db, &req.token, Purpose::MagicLink, &email)?;
    let user = users::find_or_create_by_email(&state.db, &redeemed.email)?;

    let mut joined = None;
    if let Some(handle) = &redeemed.community_handle {
        match community::get_community_by_handle(&state.db, handle)? {
            Some(c) => {
                let (_, created) = members::join_community(&state.db, &user.id, &c.id, Role::Member)?;
                if created {
                    state.hub.publish(FilterKey::members(&c.id));
                }
                joined = Some(c.handle);
            }
            None => tracing::warn!(handle = %handle, "Magic link names a community that no longer exists"),
        }
    }

    tracing::info!(user_id = %user.id, community = ?joined, "Magic link sign-in");
    session_response(
        &state,
        Realm::Community,
        &user,
        StatusCode::OK,
        json!({ "community": joined }),
    )
}
