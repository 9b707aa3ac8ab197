use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::http::AppState;
use crate::pool::PoolStats;
use crate::session::SessionSummary;

/// Purges every cached resource when passed as `rc`.
pub const PURGE_ALL: &str = "_all";

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub sessions: usize,
    pub cached_resources: usize,
}

#[derive(Deserialize)]
pub struct PurgeParams {
    pub rc: String,
}

#[derive(Serialize)]
pub struct PurgeResult {
    pub rc: String,
    pub purged: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        sessions: state.sessions.len(),
        cached_resources: state.cache.len(),
    })
}

pub async fn get_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.snapshot())
}

pub async fn get_pool(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.pool.stats())
}

pub async fn get_cache(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

/// `POST /admin/cache/purge?rc=<code|_all>`.
pub async fn purge_cache(
    State(state): State<AppState>,
    Query(params): Query<PurgeParams>,
) -> Result<Json<PurgeResult>, StatusCode> {
    let rc = params.rc.trim().to_string();
    if rc.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let purged = if rc == PURGE_ALL {
        state.cache.purge_all()
    } else {
        state.cache.purge(&rc)
    };
    tracing::info!(rc = %rc, purged, "Cache purge requested");
    Ok(Json(PurgeResult { rc, purged }))
}
