use serde::{Deserialize, Serialize};

use ember_core::types::{ChatEvent, RaidEvent};

/// Everything an adapter needs to open one tenant's session.
///
/// The access token arrives in plaintext from the token manager and lives
/// only inside the session.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub access_token: String,
    /// Bot account login on the platform.
    pub username: String,
    /// Platform-native user id of the connected account.
    pub user_id: String,
    /// Channel / room to join (login name, video id, or slug).
    pub channel: String,
    /// Adapter-specific extras stored on the connection (chatroom ids, …).
    pub connection_data: serde_json::Value,
}

/// An event produced by a live session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Chat(ChatEvent),
    Raid(RaidEvent),
    /// The transport closed; the worker decides whether to reconnect.
    Closed { reason: String },
}

/// Result of one outbound operation against the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// 429 from the platform — includes the parsed Retry-After window.
    Throttled { retry_after_ms: u64 },
    /// Dead or rejected credentials; the token manager should react.
    AuthError,
    /// Anything retryable (socket closed, 5xx, …).
    Transient { reason: String },
}

/// Public stream metadata used by viewer snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamInfo {
    pub live: bool,
    pub viewer_count: u32,
}

/// Currently-playing track metadata (Spotify).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NowPlaying {
    pub track: String,
    pub artist: String,
}

impl NowPlaying {
    /// The line posted to chat for `!song`.
    pub fn display(&self) -> String {
        format!("🎵 Now playing: {} — {}", self.track, self.artist)
    }
}

/// Convenience constructor used by adapters when emitting chat events.
pub fn chat_event(
    platform: ember_core::types::Platform,
    channel: &str,
    username: &str,
    text: &str,
    tags: ember_core::types::ChatTags,
) -> ChatEvent {
    ChatEvent {
        platform,
        channel: channel.to_string(),
        username: username.to_string(),
        text: text.to_string(),
        tags,
        arrived_at: chrono::Utc::now(),
    }
}

/// Convenience constructor for raid events.
pub fn raid_event(
    platform: ember_core::types::Platform,
    channel: &str,
    username: &str,
    viewers: u32,
) -> RaidEvent {
    RaidEvent {
        platform,
        channel: channel.to_string(),
        username: username.to_string(),
        viewers,
    }
}
