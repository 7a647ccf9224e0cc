use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::auth::session::SessionUser;
use crate::db;
use crate::error::AppError;
use crate::live::{snapshot_stream, FilterKey};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LiveQuery {
    /// Stable id of the client view; a reconnect by the same user with the
    /// same id replaces that user's previous subscription.
    pub view: Option<String>,
}

/// Registry key for a subscription. Signed-in views are namespaced by user
/// so one caller can never cancel another's stream; anonymous connections
/// always get a key of their own.
pub fn scoped_view_id(viewer: Option<&SessionUser>, view: Option<&str>) -> String {
    let view = view.map(str::trim).filter(|v| !v.is_empty());
    match (viewer, view) {
        (Some(user), Some(view)) => format!("user:{}/{}", user.id, view),
        _ => format!("conn:{}", db::new_id()),
    }
}

/// Serve a live query as `snapshot` events, one per full result set.
pub fn snapshot_sse<T, F>(
    state: &AppState,
    viewer: Option<&SessionUser>,
    query: LiveQuery,
    key: FilterKey,
    load: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
    F: FnMut() -> Result<Vec<T>, AppError> + Send + 'static,
{
    let view_id = scoped_view_id(viewer, query.view.as_deref());
    tracing::debug!(view_id = %view_id, ?key, "Opening live subscription");

    let handle = state.live.open(&view_id, key);
    let events = snapshot_stream(&state.hub, handle, load).map(|items| {
        let event = Event::default()
            .event("snapshot")
            .json_data(&items)
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to encode snapshot: {}", e);
                Event::default().comment("snapshot unavailable")
            });
        Ok::<_, Infallible>(event)
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> SessionUser {
        SessionUser {
            id: id.into(),
            email: format!("{}@example.com", id),
            display_name: None,
            is_admin: false,
            realm: crate::auth::Realm::Community,
        }
    }

    #[test]
    fn views_are_namespaced_per_user() {
        let ana = user("ana");
        let bo = user("bo");
        assert_eq!(
            scoped_view_id(Some(&ana), Some("feed")),
            scoped_view_id(Some(&ana), Some(" feed "))
        );
        assert_ne!(
            scoped_view_id(Some(&ana), Some("feed")),
            scoped_view_id(Some(&bo), Some("feed"))
        );
    }

    #[test]
    fn anonymous_views_never_collide() {
        assert_ne!(scoped_view_id(None, Some("feed")), scoped_view_id(None, Some("feed")));
        assert_ne!(
            scoped_view_id(Some(&user("ana")), None),
            scoped_view_id(Some(&user("ana")), None)
        );
    }
}
