use axum::routing::{get, post};
use axum::Router;

use crate::auth::handlers;
use crate::auth::{CommunityRealm, MainRealm, RealmKind};
use crate::state::AppState;

/// The password routes every realm exposes.
fn realm_routes<R: RealmKind>() -> Router<AppState> {
    Router::new()
        .route("/signup", post(handlers::sign_up::<R>))
        .route("/signin", post(handlers::sign_in::<R>))
        .route("/signout", post(handlers::sign_out::<R>))
        .route("/me", get(handlers::me::<R>))
        .route("/reset-password", post(handlers::reset_password::<R>))
        .route("/reset-password/confirm", post(handlers::confirm_reset::<R>))
}

pub fn router() -> Router<AppState> {
    let community = realm_routes::<CommunityRealm>()
        .route("/magic-link", post(handlers::request_magic_link))
        .route("/magic-link/complete", post(handlers::complete_magic_link));

    Router::new()
        .nest("/api/auth", realm_routes::<MainRealm>())
        .nest("/api/community-auth", community)
}
