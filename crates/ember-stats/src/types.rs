use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ember_core::types::{Platform, TenantId};

/// One live-stream session on one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: String,
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub peak_viewers: u32,
    /// Projection over chat_activity rows.
    pub total_messages: u64,
    /// Projection over distinct chat_activity usernames.
    pub unique_chatters: u64,
}

/// A viewer-count sample taken at the snapshot cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerSnapshot {
    pub session_id: String,
    pub viewer_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Compact per-tenant roll-up for the status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub active_sessions: u32,
    pub total_messages: u64,
    pub unique_chatters: u64,
    pub peak_viewers: u32,
}
