use thiserror::Error;

use ember_core::types::Platform;

/// Errors from worker lifecycle and the policy pipeline.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker is already running")]
    AlreadyRunning,

    #[error("worker is not running")]
    NotRunning,

    #[error("tenant not found or deleted")]
    TenantUnavailable,

    #[error("no connected platforms to run on")]
    NoPlatforms,

    #[error("platform {0} is not connected")]
    PlatformUnavailable(Platform),

    #[error("store error: {0}")]
    Store(#[from] ember_store::StoreError),

    #[error("stats error: {0}")]
    Stats(#[from] ember_stats::StatsError),

    #[error("queue error: {0}")]
    Queue(#[from] ember_queue::QueueError),

    #[error("token error: {0}")]
    Token(#[from] ember_tokens::TokenError),

    #[error("adapter error: {0}")]
    Adapter(#[from] ember_platforms::AdapterError),

    #[error("AI provider error: {0}")]
    Ai(#[from] ember_ai::ProviderError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
