use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a tenant (one streamer account).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new() -> Self {
        // UUIDv7 includes timestamp — sortable and traceable in logs
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A live-streaming network the bot can connect to.
///
/// Spotify is read-only (now-playing metadata) and never carries chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitch,
    Youtube,
    Kick,
    Spotify,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitch => "twitch",
            Platform::Youtube => "youtube",
            Platform::Kick => "kick",
            Platform::Spotify => "spotify",
        }
    }

    /// All platforms, including the read-only ones.
    pub fn all() -> [Platform; 4] {
        [
            Platform::Twitch,
            Platform::Youtube,
            Platform::Kick,
            Platform::Spotify,
        ]
    }

    /// Platforms that carry a chat stream (everything except Spotify).
    pub fn chat_platforms() -> [Platform; 3] {
        [Platform::Twitch, Platform::Youtube, Platform::Kick]
    }

    pub fn is_chat(&self) -> bool {
        !matches!(self, Platform::Spotify)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twitch" => Ok(Platform::Twitch),
            "youtube" => Ok(Platform::Youtube),
            "kick" => Ok(Platform::Kick),
            "spotify" => Ok(Platform::Spotify),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Normalized sender metadata attached to every chat event.
///
/// Adapters translate platform-native badge soup into this concrete shape
/// so the pipeline never does structural access on raw payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatTags {
    pub is_subscriber: bool,
    pub is_moderator: bool,
    pub is_broadcaster: bool,
    #[serde(default)]
    pub badges: HashSet<String>,
}

impl ChatTags {
    /// Highest permission level this sender satisfies.
    pub fn permission_level(&self) -> PermissionLevel {
        if self.is_broadcaster {
            PermissionLevel::Broadcaster
        } else if self.is_moderator {
            PermissionLevel::Moderator
        } else if self.is_subscriber {
            PermissionLevel::Subscriber
        } else {
            PermissionLevel::Everyone
        }
    }
}

/// Who may trigger a command. Ordered: everyone < subscriber < moderator < broadcaster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    #[default]
    Everyone,
    Subscriber,
    Moderator,
    Broadcaster,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Everyone => "everyone",
            PermissionLevel::Subscriber => "subscriber",
            PermissionLevel::Moderator => "moderator",
            PermissionLevel::Broadcaster => "broadcaster",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "everyone" => Ok(PermissionLevel::Everyone),
            "subscriber" => Ok(PermissionLevel::Subscriber),
            "moderator" => Ok(PermissionLevel::Moderator),
            "broadcaster" => Ok(PermissionLevel::Broadcaster),
            other => Err(format!("unknown permission level: {}", other)),
        }
    }
}

/// A single inbound chat message, normalized across platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub platform: Platform,
    /// Platform-native channel/room identifier.
    pub channel: String,
    pub username: String,
    pub text: String,
    pub tags: ChatTags,
    pub arrived_at: DateTime<Utc>,
}

impl ChatEvent {
    /// Commands keep their place in the bounded inbound channel when it
    /// overflows; ordinary chatter is dropped first.
    pub fn is_command(&self) -> bool {
        self.text.starts_with('!')
    }
}

/// An incoming raid notification (another streamer sent their viewers over).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaidEvent {
    pub platform: Platform,
    pub channel: String,
    pub username: String,
    pub viewers: u32,
}

/// An outbound action the pipeline asks a platform adapter to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatAction {
    /// Post a plain message to the channel.
    Say { text: String },
    /// Post a message addressed at a user (rendered as `@user text`).
    Reply { to: String, text: String },
    /// Temporarily silence a user.
    Timeout {
        username: String,
        seconds: u32,
        reason: String,
    },
    /// Permanently remove a user from the channel.
    Ban { username: String, reason: String },
}

impl ChatAction {
    /// The message text an adapter should post, if this action posts one.
    pub fn message_text(&self) -> Option<String> {
        match self {
            ChatAction::Say { text } => Some(text.clone()),
            ChatAction::Reply { to, text } => Some(format!("@{} {}", to, text)),
            _ => None,
        }
    }
}

/// Kind discriminator for events flowing over the per-tenant bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotEventKind {
    StatusChanged,
    NewMessage,
    Error,
    ModerationAction,
    GiveawayEntry,
    TrainingProgress,
}

impl BotEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotEventKind::StatusChanged => "status_changed",
            BotEventKind::NewMessage => "new_message",
            BotEventKind::Error => "error",
            BotEventKind::ModerationAction => "moderation_action",
            BotEventKind::GiveawayEntry => "giveaway_entry",
            BotEventKind::TrainingProgress => "training_progress",
        }
    }

    /// Only giveaway entries must survive a slow or absent consumer.
    pub fn is_durable(&self) -> bool {
        matches!(self, BotEventKind::GiveawayEntry)
    }
}

impl fmt::Display for BotEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One event on the per-tenant fan-out bus (rendered as SSE to the UI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotEvent {
    pub tenant: TenantId,
    #[serde(rename = "type")]
    pub kind: BotEventKind,
    pub payload: serde_json::Value,
    pub seq: u64,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        for p in Platform::all() {
            let parsed: Platform = p.as_str().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn platform_parse_is_case_insensitive() {
        assert_eq!("Twitch".parse::<Platform>().unwrap(), Platform::Twitch);
        assert!("mixer".parse::<Platform>().is_err());
    }

    #[test]
    fn spotify_is_not_a_chat_platform() {
        assert!(!Platform::Spotify.is_chat());
        assert!(!Platform::chat_platforms().contains(&Platform::Spotify));
    }

    #[test]
    fn permission_levels_are_ordered() {
        assert!(PermissionLevel::Everyone < PermissionLevel::Subscriber);
        assert!(PermissionLevel::Subscriber < PermissionLevel::Moderator);
        assert!(PermissionLevel::Moderator < PermissionLevel::Broadcaster);
    }

    #[test]
    fn tags_map_to_highest_level() {
        let tags = ChatTags {
            is_subscriber: true,
            is_moderator: true,
            ..Default::default()
        };
        assert_eq!(tags.permission_level(), PermissionLevel::Moderator);
    }

    #[test]
    fn reply_renders_with_mention() {
        let action = ChatAction::Reply {
            to: "alice".to_string(),
            text: "please slow down".to_string(),
        };
        assert_eq!(
            action.message_text().unwrap(),
            "@alice please slow down"
        );
        assert_eq!(
            ChatAction::Ban {
                username: "bob".into(),
                reason: "spam".into()
            }
            .message_text(),
            None
        );
    }
}
