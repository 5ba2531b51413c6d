//! OAuth begin / callback / disconnect.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Redirect;
use serde::Deserialize;
use tracing::{error, info};

use ember_core::types::Platform;
use ember_tokens::TokenError;

use crate::app::{ApiError, AppState};
use crate::auth::AuthedTenant;

fn parse_platform(raw: &str) -> Result<Platform, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("unknown platform: {}", raw)))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

/// POST /auth/{platform} — begin the OAuth handshake; 303 to the provider.
pub async fn begin_handler(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    AuthedTenant(tenant): AuthedTenant,
) -> Result<Redirect, ApiError> {
    let platform = parse_platform(&platform)?;
    let url = state
        .tokens
        .begin_oauth(&tenant, platform, client_ip(&headers).as_deref())?;
    info!(tenant = %tenant, platform = %platform, "oauth handshake started");
    Ok(Redirect::to(&url))
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Provider-reported denial (user clicked cancel, bad scopes, …).
    pub error: Option<String>,
}

/// GET /auth/{platform}/callback — complete the handshake; 303 to settings.
///
/// The provider redirects the browser here, so there is no bearer token;
/// the tenant is recovered from the single-use OAuth session.
pub async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, ApiError> {
    let platform = parse_platform(&platform)?;
    if let Some(provider_error) = query.error {
        return Err(ApiError::bad_request(format!(
            "provider denied authorization: {}",
            provider_error
        )));
    }
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err(ApiError::bad_request("code and state are required"));
    };

    match state.tokens.complete_oauth(&oauth_state, &code).await {
        Ok((tenant, connected)) => {
            info!(tenant = %tenant, platform = %connected, "oauth connection completed");
            Ok(Redirect::to(&format!("/settings?connected={}", connected)))
        }
        Err(err @ (TokenError::Replay | TokenError::UnknownState | TokenError::SessionExpired)) => {
            // Replays are a security signal, not a user mistake.
            error!(platform = %platform, error = %err, "oauth state rejected");
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// DELETE /auth/{platform}/disconnect — drop the stored connection.
pub async fn disconnect_handler(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    AuthedTenant(tenant): AuthedTenant,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let platform = parse_platform(&platform)?;
    state.tokens.disconnect(&tenant, platform)?;
    Ok(axum::Json(serde_json::json!({ "disconnected": platform })))
}
