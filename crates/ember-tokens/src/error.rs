use thiserror::Error;

use ember_core::types::Platform;

/// Errors from the OAuth / token lifecycle manager.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The state does not match any stored OAuth session.
    #[error("unknown OAuth state")]
    UnknownState,

    /// The state was already consumed — a replayed callback.
    #[error("OAuth state already used")]
    Replay,

    /// The OAuth session passed its 10-minute TTL.
    #[error("OAuth session expired")]
    SessionExpired,

    /// No OAuth application is configured for the platform.
    #[error("no OAuth app configured for {0}")]
    AppNotConfigured(Platform),

    /// The tenant has no stored connection for the platform.
    #[error("no {platform} connection for tenant {tenant}")]
    NotConnected { tenant: String, platform: Platform },

    /// The provider rejected a code or refresh exchange.
    #[error("token exchange failed ({status}): {message}")]
    ExchangeFailed { status: u16, message: String },

    /// The refresh token itself is no longer valid (`invalid_grant`).
    #[error("refresh token revoked: {0}")]
    RefreshRevoked(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store error: {0}")]
    Store(#[from] ember_store::StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] ember_core::crypto::CryptoError),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, TokenError>;
