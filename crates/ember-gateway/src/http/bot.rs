//! Bot worker control: start / stop / restart / reload / post-manual /
//! status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use ember_core::types::Platform;

use crate::app::{ApiError, AppState};
use crate::auth::AuthedTenant;

/// POST /bot/start — idempotent; an already-running worker reports status.
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    AuthedTenant(tenant): AuthedTenant,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state.supervisor.start(&tenant).await?;
    Ok(Json(serde_json::to_value(status)?))
}

/// POST /bot/stop — idempotent graceful drain.
pub async fn stop_handler(
    State(state): State<Arc<AppState>>,
    AuthedTenant(tenant): AuthedTenant,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state.supervisor.stop(&tenant).await?;
    Ok(Json(serde_json::to_value(status)?))
}

/// POST /bot/restart — stop + start, atomic from the caller's view.
pub async fn restart_handler(
    State(state): State<Arc<AppState>>,
    AuthedTenant(tenant): AuthedTenant,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state.supervisor.restart(&tenant).await?;
    Ok(Json(serde_json::to_value(status)?))
}

/// POST /bot/reload — re-read config on the running worker.
pub async fn reload_handler(
    State(state): State<Arc<AppState>>,
    AuthedTenant(tenant): AuthedTenant,
) -> Result<StatusCode, ApiError> {
    state.supervisor.reload(&tenant)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct PostManualBody {
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub fact: Option<String>,
}

/// POST /bot/post-manual — post now, optionally with caller-supplied text.
pub async fn post_manual_handler(
    State(state): State<Arc<AppState>>,
    AuthedTenant(tenant): AuthedTenant,
    Json(body): Json<PostManualBody>,
) -> Result<StatusCode, ApiError> {
    let mut platforms = Vec::with_capacity(body.platforms.len());
    for raw in &body.platforms {
        let platform: Platform = raw
            .parse()
            .map_err(|_| ApiError::bad_request(format!("unknown platform: {}", raw)))?;
        platforms.push(platform);
    }
    state
        .supervisor
        .post_manual(&tenant, &platforms, body.fact)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /bot/status — `{isRunning, lastPostedAt, stats, …}`.
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    AuthedTenant(tenant): AuthedTenant,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state.supervisor.status(&tenant);
    let alerts = state.token_store.active_alerts(&tenant).unwrap_or_default();
    let ctx = state.supervisor.context();
    let health: Vec<_> = Platform::all()
        .into_iter()
        .map(|p| ctx.breaker.health(p))
        .collect();
    Ok(Json(serde_json::json!({
        "isRunning": status.is_running,
        "state": status.state,
        "since": status.since,
        "lastPostedAt": status.last_posted_at,
        "lastError": status.last_error,
        "droppedMessages": status.dropped_messages,
        "stats": status.stats,
        "tokenAlerts": alerts,
        "platformHealth": health,
    })))
}
