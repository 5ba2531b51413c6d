use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use ember_core::config::EmberConfig;
use ember_core::crypto::OverlaySigner;
use ember_tokens::{TokenError, TokenManager, TokenStore};
use ember_worker::{Supervisor, WorkerError};

/// Central shared state — passed as Arc<AppState> to all handlers.
pub struct AppState {
    pub config: EmberConfig,
    pub supervisor: Arc<Supervisor>,
    pub tokens: Arc<TokenManager>,
    pub token_store: Arc<TokenStore>,
    /// Signs the header-less overlay URLs handed to OBS browser sources.
    pub overlay: OverlaySigner,
}

impl AppState {
    pub fn new(
        config: EmberConfig,
        supervisor: Arc<Supervisor>,
        tokens: Arc<TokenManager>,
        token_store: Arc<TokenStore>,
    ) -> Self {
        let overlay = OverlaySigner::from_secret(&config.security.session_secret);
        Self {
            config,
            supervisor,
            tokens,
            token_store,
            overlay,
        }
    }
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/auth/{platform}", post(crate::http::auth::begin_handler))
        .route(
            "/auth/{platform}/callback",
            get(crate::http::auth::callback_handler),
        )
        .route(
            "/auth/{platform}/disconnect",
            delete(crate::http::auth::disconnect_handler),
        )
        .route("/bot/start", post(crate::http::bot::start_handler))
        .route("/bot/stop", post(crate::http::bot::stop_handler))
        .route("/bot/restart", post(crate::http::bot::restart_handler))
        .route("/bot/reload", post(crate::http::bot::reload_handler))
        .route(
            "/bot/post-manual",
            post(crate::http::bot::post_manual_handler),
        )
        .route("/bot/status", get(crate::http::bot::status_handler))
        .route("/events", get(crate::http::events::events_handler))
        .route("/events/ack", post(crate::http::events::ack_handler))
        .route(
            "/events/overlay-url",
            post(crate::http::events::overlay_url_handler),
        )
        .route(
            "/overlay/{token}/events",
            get(crate::http::events::overlay_events_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Uniform JSON error body with the contractual status codes.
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "missing or invalid credentials")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        let status = match &err {
            WorkerError::AlreadyRunning => StatusCode::CONFLICT,
            WorkerError::NotRunning => StatusCode::CONFLICT,
            WorkerError::TenantUnavailable => StatusCode::FORBIDDEN,
            WorkerError::NoPlatforms | WorkerError::PlatformUnavailable(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, "WORKER_ERROR", err.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        let (status, code) = match &err {
            TokenError::Replay | TokenError::UnknownState | TokenError::SessionExpired => {
                (StatusCode::BAD_REQUEST, "invalid_state")
            }
            TokenError::AppNotConfigured(_) => (StatusCode::BAD_REQUEST, "APP_NOT_CONFIGURED"),
            TokenError::NotConnected { .. } => (StatusCode::BAD_REQUEST, "NOT_CONNECTED"),
            TokenError::ExchangeFailed { .. } | TokenError::RefreshRevoked(_) => {
                (StatusCode::BAD_GATEWAY, "EXCHANGE_FAILED")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "TOKEN_ERROR"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SERIALIZATION_ERROR",
            err.to_string(),
        )
    }
}

impl From<ember_store::StoreError> for ApiError {
    fn from(err: ember_store::StoreError) -> Self {
        let status = match &err {
            ember_store::StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            ember_store::StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            ember_store::StoreError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, "STORE_ERROR", err.to_string())
    }
}
