use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::json;

use super::communities::viewer_role;
use super::live::{snapshot_sse, LiveQuery};
use crate::community::interactions::{self, InteractionEvent, InteractionType};
use crate::community::posts::{self, NewPost, PostUpdate};
use crate::community::{self, get_user_role_in_community};
use crate::db::models::{Post, PostType, Visibility};
use crate::error::{AppError, AppResult};
use crate::extractors::{AnyUser, MaybeUser};
use crate::live::FilterKey;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/communities/{handle}/posts",
            get(list_posts).post(create_post),
        )
        .route("/api/communities/{handle}/posts/live", get(live_posts))
        .route("/api/posts/{id}", patch(update_post).delete(delete_post))
        .route("/api/posts/{id}/like", post(toggle_like))
        .route("/api/interactions", post(record_interaction))
}

async fn list_posts(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(handle): Path<String>,
) -> AppResult<Json<Vec<Post>>> {
    let community = community::require_community(&state.db, &handle)?;
    let role = viewer_role(&state, &user, &community)?;
    Ok(Json(posts::list_posts(&state.db, &community.id, role.is_member())?))
}

async fn live_posts(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(handle): Path<String>,
    Query(query): Query<LiveQuery>,
) -> AppResult<Response> {
    let community = community::require_community(&state.db, &handle)?;
    let include_private = viewer_role(&state, &user, &community)?.is_member();

    let pool = state.db.clone();
    let community_id = community.id.clone();
    let sse = snapshot_sse(&state, user.0.as_ref(), query, FilterKey::posts(&community.id), move || {
        posts::list_posts(&pool, &community_id, include_private)
    });
    Ok(sse.into_response())
}

async fn create_post(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path(handle): Path<String>,
    Json(new): Json<NewPost>,
) -> AppResult<(StatusCode, Json<Post>)> {
    let community = community::require_community(&state.db, &handle)?;
    let role = get_user_role_in_community(&state.db, &user.id, &community.id)?;
    if !role.is_member() {
        return Err(AppError::Forbidden);
    }

    let post = posts::create_post(&state.db, &community, &user.id, new)?;
    state.hub.publish(FilterKey::posts(&community.id));
    Ok((StatusCode::CREATED, Json(post)))
}

/// Authors edit their own posts; owners and admins edit any post.
fn require_editor(state: &AppState, user_id: &str, post: &Post) -> AppResult<()> {
    if post.author_id == user_id {
        return Ok(());
    }
    let role = get_user_role_in_community(&state.db, user_id, &post.community_id)?;
    if role.can_manage() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

async fn update_post(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path(id): Path<String>,
    Json(changes): Json<PostUpdate>,
) -> AppResult<Json<Post>> {
    let post = posts::get_post(&state.db, &id)?.ok_or(AppError::NotFound)?;
    require_editor(&state, &user.id, &post)?;

    let updated = posts::update_post(&state.db, &id, changes)?.ok_or(AppError::NotFound)?;
    state.hub.publish(FilterKey::posts(&updated.community_id));
    Ok(Json(updated))
}

async fn delete_post(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let post = posts::get_post(&state.db, &id)?.ok_or(AppError::NotFound)?;
    require_editor(&state, &user.id, &post)?;

    let Some(deleted) = posts::delete_post(&state.db, &id)? else {
        return Err(AppError::NotFound);
    };
    state.hub.publish(FilterKey::posts(&deleted.community_id));

    // Media cleanup is best effort; the post is already gone.
    for url in &deleted.content.media_urls {
        let store = if state.mock_blobs.path_for_url(url).is_some() {
            &state.mock_blobs
        } else {
            &state.blobs
        };
        let Some(path) = store.path_for_url(url) else {
            tracing::debug!(url = %url, "Media not held by a known store, leaving it");
            continue;
        };
        if let Err(e) = store.delete(&path).await {
            tracing::warn!(post_id = %deleted.id, path = %path, "Failed to delete post media: {}", e);
        }
    }

    Ok(Json(json!({ "success": true })))
}

/// Private posts, and every post of a private community, are only visible
/// to members.
fn require_visible(state: &AppState, user_id: &str, post: &Post) -> AppResult<()> {
    let community = community::get_community_by_id(&state.db, &post.community_id)?
        .ok_or(AppError::NotFound)?;
    let hidden = post.visibility == Visibility::Private || community.visibility == Visibility::Private;
    if hidden && !get_user_role_in_community(&state.db, user_id, &community.id)?.is_member() {
        tracing::warn!(user_id, post_id = %post.id, "Non-member touched a private post");
        return Err(AppError::Forbidden);
    }
    Ok(())
}

async fn toggle_like(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Path(id): Path<String>,
) -> AppResult<Json<interactions::LikeOutcome>> {
    let post = posts::get_post(&state.db, &id)?.ok_or(AppError::NotFound)?;
    require_visible(&state, &user.id, &post)?;

    let pool = state.db.clone();
    let (post_id, user_id) = (id.clone(), user.id.clone());
    let outcome = crate::db::blocking(move || interactions::toggle_like(&pool, &post_id, &user_id)).await?;

    state.hub.publish(FilterKey::posts(&post.community_id));
    if outcome.liked {
        let media_type = (post.post_type != PostType::Text).then(|| post.post_type.as_str().to_string());
        state.interactions.record(InteractionEvent {
            user_id: user.id,
            post_id: post.id,
            community_id: post.community_id,
            interaction_type: InteractionType::Like,
            media_type,
            play_duration_seconds: None,
        });
    }

    Ok(Json(outcome))
}

/// Queued for the background writer; the caller never waits on storage.
/// Events are always recorded for the session user.
async fn record_interaction(
    State(state): State<AppState>,
    AnyUser(user): AnyUser,
    Json(mut event): Json<InteractionEvent>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    event.user_id = user.id;
    event.validate()?;

    let post = posts::get_post(&state.db, &event.post_id)?.ok_or(AppError::NotFound)?;
    if post.community_id != event.community_id {
        return Err(AppError::BadRequest(
            "postId does not belong to communityId".into(),
        ));
    }
    require_visible(&state, &event.user_id, &post)?;

    state.interactions.record(event);
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": true }))))
}
