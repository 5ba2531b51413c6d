use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ember_core::types::{Platform, TenantId};

/// Why a token rotation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationType {
    /// Proactive refresh inside the expiry window.
    Scheduled,
    /// Refresh triggered by a 401 from a platform call.
    OnError,
    /// Operator-initiated refresh.
    Manual,
    /// Refresh prompted by an expiry warning alert.
    ExpiryWarning,
}

impl RotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationType::Scheduled => "scheduled",
            RotationType::OnError => "on_error",
            RotationType::Manual => "manual",
            RotationType::ExpiryWarning => "expiry_warning",
        }
    }
}

/// Credential-lifetime alert kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "24hr_warning")]
    Warning24h,
    #[serde(rename = "1hr_warning")]
    Warning1h,
    #[serde(rename = "expired")]
    Expired,
    #[serde(rename = "refresh_failed")]
    RefreshFailed,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Warning24h => "24hr_warning",
            AlertType::Warning1h => "1hr_warning",
            AlertType::Expired => "expired",
            AlertType::RefreshFailed => "refresh_failed",
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "24hr_warning" => Ok(AlertType::Warning24h),
            "1hr_warning" => Ok(AlertType::Warning1h),
            "expired" => Ok(AlertType::Expired),
            "refresh_failed" => Ok(AlertType::RefreshFailed),
            other => Err(format!("unknown alert type: {}", other)),
        }
    }
}

/// A short-lived, single-use OAuth handshake record.
#[derive(Debug, Clone)]
pub struct OAuthSession {
    pub state: String,
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub code_verifier: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
}

/// Plaintext tokens returned by a provider exchange. Never persisted as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, when the provider reports one.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<serde_json::Value>,
}

impl TokenSet {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64))
    }
}

/// One row of the append-only rotation history.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRotation {
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub rotation_type: RotationType,
    pub previous_expires_at: Option<DateTime<Utc>>,
    pub new_expires_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error_message: Option<String>,
    pub rotated_at: DateTime<Utc>,
}

/// A raised (and possibly acknowledged) expiry alert.
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryAlert {
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub alert_type: AlertType,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub notified: bool,
    pub acknowledged: bool,
    pub raised_at: DateTime<Utc>,
}
