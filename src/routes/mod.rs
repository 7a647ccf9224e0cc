pub mod access;
pub mod auth;
pub mod broadcast;
pub mod communities;
pub mod email;
pub mod integrations;
pub mod live;
pub mod posts;
pub mod uploads;
pub mod whatsapp;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::AppResult;
use crate::state::AppState;

/// The full HTTP surface. Tests drive this router directly.
pub fn app(state: AppState) -> Router {
    let static_files = ServeDir::new(state.config.uploads_path());

    Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(communities::router())
        .merge(posts::router())
        .merge(uploads::router(&state.config.uploads))
        .merge(email::router())
        .merge(whatsapp::router())
        .merge(access::router())
        .merge(integrations::router())
        .merge(broadcast::router())
        .nest_service("/uploads", static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let conn = state.db.get()?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "liveSubscriptions": state.live.active_count(),
    })))
}
