//! Server-Sent Events fan-out per tenant, plus the durable-event ack.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::Stream;
use serde::Deserialize;
use tracing::debug;

use ember_core::types::BotEvent;

use crate::app::{ApiError, AppState};
use crate::auth::AuthedTenant;

/// SSE heartbeat cadence (`: ping` comment frames).
const SSE_PING_SECS: u64 = 30;

fn sse_event(event: &BotEvent) -> Event {
    // framing: `data: <json>\n\n`
    Event::default().data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}

/// GET /events — per-tenant event stream.
///
/// The unacked giveaway backlog is replayed first, then live events follow
/// in per-subscriber FIFO order. A lagging consumer loses only best-effort
/// kinds; durable events stay in the outbox until acked.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    AuthedTenant(tenant): AuthedTenant,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(tenant = %tenant, "sse subscriber attached");
    Sse::new(event_stream(state, tenant)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_PING_SECS))
            .text("ping"),
    )
}

/// Stream a tenant's events as SSE frames (shared by the authed and
/// overlay variants).
fn event_stream(
    state: Arc<AppState>,
    tenant: ember_core::types::TenantId,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let (backlog, mut live) = state.supervisor.subscribe(&tenant);
    async_stream::stream! {
        for event in &backlog {
            yield Ok(sse_event(event));
        }
        loop {
            match live.recv().await {
                Ok(event) => yield Ok(sse_event(&event)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(tenant = %tenant, skipped, "sse subscriber lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Overlay URL lifetime.
const OVERLAY_TOKEN_TTL_SECS: i64 = 60 * 60 * 24 * 30;

/// POST /events/overlay-url — mint a signed, header-less SSE URL for OBS
/// browser sources (which cannot send Authorization headers).
pub async fn overlay_url_handler(
    State(state): State<Arc<AppState>>,
    AuthedTenant(tenant): AuthedTenant,
) -> Json<serde_json::Value> {
    let expires = chrono::Utc::now().timestamp() + OVERLAY_TOKEN_TTL_SECS;
    let token = state.overlay.sign(&tenant, expires);
    Json(serde_json::json!({
        "url": format!("/overlay/{}/events", token),
        "expiresAt": expires,
    }))
}

/// GET /overlay/{token}/events — the signed-token variant of `/events`.
pub async fn overlay_events_handler(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(token): axum::extract::Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let tenant = state
        .overlay
        .verify(&token, chrono::Utc::now().timestamp())
        .ok_or_else(ApiError::unauthorized)?;
    Ok(Sse::new(event_stream(state, tenant)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_PING_SECS))
            .text("ping"),
    ))
}

#[derive(Deserialize)]
pub struct AckBody {
    pub seq: u64,
}

/// POST /events/ack — acknowledge durable events up to `seq`.
pub async fn ack_handler(
    State(state): State<Arc<AppState>>,
    AuthedTenant(tenant): AuthedTenant,
    Json(body): Json<AckBody>,
) -> Result<StatusCode, ApiError> {
    state.supervisor.ack_events(&tenant, body.seq);
    Ok(StatusCode::NO_CONTENT)
}
