use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::live::{snapshot_sse, LiveQuery};
use crate::auth::normalize_email;
use crate::community::{
    self, members, members::MemberUpdate, roles::role_for, CommunityUpdate, NewCommunity, Role,
};
use crate::db::models::{Community, Visibility};
use crate::error::{AppError, AppResult};
use crate::extractors::{AnyUser, DashboardUser, MaybeUser, MemberUser};
use crate::live::FilterKey;
use crate::state::AppState;
use crate::users;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/communities", get(list_owned).post(create))
        .route("/api/communities/{handle}", get(get_by_handle).patch(update))
        .route("/api/communities/{handle}/role", get(caller_role))
        .route(
            "/api/communities/{handle}/members",
            get(list_members).post(add_member),
        )
        .route("/api/communities/{handle}/members/live", get(live_members))
        .route(
            "/api/communities/{handle}/members/{user_id}",
            patch(update_member).delete(remove_member),
        )
        .route("/api/communities/{handle}/join", post(join))
        .route("/api/community-auth/communities", get(joined))
}

/// The caller's role must allow managing the community.
pub(crate) fn require_manager(state: &AppState, user_id: &str, community: &Community) -> AppResult<Role> {
    let role = community::get_user_role_in_community(&state.db, user_id, &community.id)?;
    if !role.can_manage() {
        return Err(AppError::Forbidden);
    }
    Ok(role)
}

/// Guests may read public communities only.
pub(crate) fn viewer_role(state: &AppState, user: &MaybeUser, community: &Community) -> AppResult<Role> {
    let role = role_for(&state.db, user.0.as_ref().map(|u| u.id.as_str()), &community.id)?;
    if community.visibility == Visibility::Private && !role.is_member() {
        return Err(match user.0 {
            Some(_) => AppError::Forbidden,
            None => AppError::Unauthorized,
        });
    }
    Ok(role)
}

/// GET /api/communities: communities the dashboard user owns.
async fn list_owned(
    State(state): State<AppState>,
    DashboardUser(user): DashboardUser,
) -> AppResult<Json<Vec<Community>>> {
    Ok(Json(community::list_owned_communities(&state.db, &user.id)?))
}

/// GET /api/community-auth/communities: communities the member has joined.
async fn joined(
    State(state): State<AppState>,
    MemberUser(user): MemberUser,
) -> AppResult<Json<Vec<Community>>> {
    Ok(Json(community::list_joined_communities(&state.db, &user.id)?))
}

async fn create(
    State(state): State<AppState>,
    DashboardUser(user): DashboardUser,
    Json(new): Json<NewCommunity>,
) -> AppResult<(StatusCode, Json<Community>)> {
    let community = community::create_community(&state.db, &user.id, new)?;
    state.hub.publish(FilterKey::members(&community.id));
    Ok((StatusCode::CREATED, Json(community)))
}

/// `null` when no community has this handle.
async fn get_by_handle(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> AppResult<Json<Option<Community>>> {
    Ok(Json(community::get_community_by_handle(&state.db, &handle)?))
}

async fn update(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path(handle): Path<String>,
    Json(changes): Json<CommunityUpdate>,
) -> AppResult<Json<Community>> {
    let community = community::require_community(&state.db, &handle)?;
    require_manager(&state, &user.id, &community)?;
    let updated = community::update_community(&state.db, &community.id, &changes)?
        .ok_or(AppError::NotFound)?;
    Ok(Json(updated))
}

async fn caller_role(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(handle): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let Some(community) = community::get_community_by_handle(&state.db, &handle)? else {
        return Ok(Json(json!({ "role": null })));
    };
    let role = role_for(&state.db, user.as_ref().map(|u| u.id.as_str()), &community.id)?;
    Ok(Json(json!({ "role": role, "communityId": community.id })))
}

async fn list_members(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(handle): Path<String>,
) -> AppResult<Response> {
    let community = community::require_community(&state.db, &handle)?;
    viewer_role(&state, &user, &community)?;
    let members = members::list_members_enriched(&state.db, &community.id)?;
    Ok(Json(members).into_response())
}

async fn live_members(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(handle): Path<String>,
    Query(query): Query<LiveQuery>,
) -> AppResult<Response> {
    let community = community::require_community(&state.db, &handle)?;
    viewer_role(&state, &user, &community)?;

    let pool = state.db.clone();
    let community_id = community.id.clone();
    let sse = snapshot_sse(&state, user.0.as_ref(), query, FilterKey::members(&community.id), move || {
        members::list_members_enriched(&pool, &community_id)
    });
    Ok(sse.into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberRequest {
    email: String,
    display_name: Option<String>,
    role: Option<Role>,
    tags: Option<Vec<String>>,
}

/// Owners and admins add people by email; unknown addresses get a
/// password-less account they can later claim via magic link.
async fn add_member(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path(handle): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> AppResult<Response> {
    let community = community::require_community(&state.db, &handle)?;
    require_manager(&state, &user.id, &community)?;

    let email = normalize_email(&req.email);
    if !crate::auth::looks_like_email(&email) {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }
    let target = users::find_or_create_by_email(&state.db, &email)?;
    if target.display_name.is_none() && req.display_name.is_some() {
        users::update_profile(
            &state.db,
            &target.id,
            &users::ProfileUpdate {
                display_name: req.display_name,
                ..Default::default()
            },
        )?;
    }

    let role = req.role.unwrap_or(Role::Member);
    let (mut member, created) = members::join_community(&state.db, &target.id, &community.id, role)?;
    if let Some(tags) = req.tags {
        let update = MemberUpdate {
            role: None,
            tags: Some(tags),
        };
        if let Some(updated) = members::update_member(&state.db, &community.id, &target.id, &update)? {
            member = updated;
        }
    }
    state.hub.publish(FilterKey::members(&community.id));

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(member)).into_response())
}

async fn join(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path(handle): Path<String>,
) -> AppResult<Response> {
    let community = community::require_community(&state.db, &handle)?;
    let (member, created) = members::join_community(&state.db, &user.id, &community.id, Role::Member)?;
    if created {
        state.hub.publish(FilterKey::members(&community.id));
    }
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(member)).into_response())
}

async fn update_member(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path((handle, member_id)): Path<(String, String)>,
    Json(changes): Json<MemberUpdate>,
) -> AppResult<Response> {
    let community = community::require_community(&state.db, &handle)?;
    let caller = require_manager(&state, &user.id, &community)?;
    if member_id == community.owner_id {
        return Err(AppError::BadRequest("The owner's membership cannot be changed".into()));
    }
    if changes.role == Some(Role::Admin) && caller != Role::Owner {
        return Err(AppError::Forbidden);
    }

    let member = members::update_member(&state.db, &community.id, &member_id, &changes)?
        .ok_or(AppError::NotFound)?;
    state.hub.publish(FilterKey::members(&community.id));
    Ok(Json(member).into_response())
}

/// Managers remove anyone but the owner; members may remove themselves.
async fn remove_member(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path((handle, member_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let community = community::require_community(&state.db, &handle)?;
    if member_id == community.owner_id {
        return Err(AppError::BadRequest("The owner cannot leave their own community".into()));
    }
    if member_id != user.id {
        require_manager(&state, &user.id, &community)?;
    }

    if !members::remove_member(&state.db, &community.id, &member_id)? {
        return Err(AppError::NotFound);
    }
    tracing::info!(community_id = %community.id, user_id = %member_id, removed_by = %user.id, "Member removed");
    state.hub.publish(FilterKey::members(&community.id));
    Ok(Json(json!({ "success": true })).into_response())
}
