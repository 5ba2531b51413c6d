use thiserror::Error;

/// Cross-cutting error kinds for the runtime.
///
/// Subsystems keep their own error enums; anything that reaches the
/// control plane or the worker boundary is mapped into one of these
/// kinds so the HTTP layer and the event bus can classify it.
#[derive(Debug, Error)]
pub enum EmberError {
    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Authentication expired for {platform}")]
    AuthExpired { platform: String },

    #[error("Throttled, retry after {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    #[error("Circuit breaker open for {platform}")]
    BreakerOpen { platform: String },

    #[error("Quota exceeded for {platform}")]
    QuotaExceeded { platform: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("OAuth state already consumed or unknown")]
    ReplayDetected,

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Denied by moderation rule {rule}")]
    PolicyDenied { rule: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bot is already running")]
    AlreadyRunning,

    #[error("Bot is not running")]
    NotRunning,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmberError {
    /// Short error code string surfaced to API clients and events.
    pub fn code(&self) -> &'static str {
        match self {
            EmberError::ConfigInvalid(_) => "CONFIG_INVALID",
            EmberError::AuthExpired { .. } => "AUTH_EXPIRED",
            EmberError::Throttled { .. } => "THROTTLED",
            EmberError::BreakerOpen { .. } => "BREAKER_OPEN",
            EmberError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            EmberError::ValidationFailed(_) => "VALIDATION_FAILED",
            EmberError::ReplayDetected => "REPLAY_DETECTED",
            EmberError::Transient(_) => "TRANSIENT",
            EmberError::PolicyDenied { .. } => "POLICY_DENIED",
            EmberError::NotFound(_) => "NOT_FOUND",
            EmberError::AlreadyRunning => "ALREADY_RUNNING",
            EmberError::NotRunning => "NOT_RUNNING",
            EmberError::Database(_) => "DATABASE_ERROR",
            EmberError::Serialization(_) => "SERIALIZATION_ERROR",
            EmberError::Io(_) => "IO_ERROR",
            EmberError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether local retry with backoff is appropriate for this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmberError::Throttled { .. }
                | EmberError::BreakerOpen { .. }
                | EmberError::QuotaExceeded { .. }
                | EmberError::Transient(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EmberError>;
