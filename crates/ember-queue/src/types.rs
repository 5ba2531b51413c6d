use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ember_core::types::{Platform, TenantId};

/// Lifecycle of a queued outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for its scheduled_for time.
    Pending,
    /// Claimed by a drainer.
    Processing,
    /// Delivered — terminal, never redelivered.
    Completed,
    /// Retries exhausted — terminal.
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Completed => "completed",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "processing" => Ok(MessageStatus::Processing),
            "completed" => Ok(MessageStatus::Completed),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

/// One durable outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub tenant_id: TenantId,
    pub platform: Platform,
    /// What kind of outbound this is (chat, timeout, ban, announcement, …).
    pub message_type: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub status: MessageStatus,
    /// 0..10, higher drains first.
    pub priority: u8,
    pub scheduled_for: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}
