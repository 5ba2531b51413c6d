use thiserror::Error;

/// Errors that can occur within any platform adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The underlying transport could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The platform rejected the supplied credentials or token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The adapter could not resolve required channel metadata
    /// (chat id, broadcaster id, live broadcast, …).
    #[error("Channel resolution failed: {0}")]
    ChannelResolution(String),

    /// An HTTP call to the platform REST surface failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A platform payload did not parse.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },
}
