//! Administrative API.
//!
//! Read-only views of sessions, the pool and the cache, plus cache purging.
//! Every route requires the configured bearer key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/sessions", get(get_sessions))
        .route("/admin/pool", get(get_pool))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/purge", post(purge_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
