use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ember_core::types::{PermissionLevel, Platform, TenantId};

/// One end user (streamer) of the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    /// Soft delete — a deleted tenant keeps its rows but can never run.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// How scheduled posts are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntervalMode {
    #[default]
    Manual,
    Fixed,
    Random,
}

impl IntervalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalMode::Manual => "manual",
            IntervalMode::Fixed => "fixed",
            IntervalMode::Random => "random",
        }
    }
}

impl std::fmt::Display for IntervalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IntervalMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(IntervalMode::Manual),
            "fixed" => Ok(IntervalMode::Fixed),
            "random" => Ok(IntervalMode::Random),
            other => Err(format!("unknown interval mode: {}", other)),
        }
    }
}

/// Per-tenant operational parameters for the bot worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub tenant_id: TenantId,
    pub interval_mode: IntervalMode,
    pub fixed_interval_minutes: u32,
    pub random_min_minutes: u32,
    pub random_max_minutes: u32,
    pub ai_model: String,
    pub ai_prompt_template: String,
    /// Temperature on a 0..20 integer scale (rendered as 0.0..2.0).
    pub ai_temperature: u8,
    pub chat_keywords: Vec<String>,
    pub banned_words: Vec<String>,
    pub active_platforms: Vec<Platform>,
    pub is_active: bool,
    pub last_posted_at: Option<DateTime<Utc>>,
}

impl BotConfig {
    pub fn defaults(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            interval_mode: IntervalMode::Manual,
            fixed_interval_minutes: 30,
            random_min_minutes: 15,
            random_max_minutes: 45,
            ai_model: "gpt-4o-mini".to_string(),
            ai_prompt_template: "Share one short interesting fact for chat.".to_string(),
            ai_temperature: 10,
            chat_keywords: Vec::new(),
            banned_words: Vec::new(),
            active_platforms: Vec::new(),
            is_active: false,
            last_posted_at: None,
        }
    }
}

/// A tenant's stored credentials for one platform.
///
/// Token columns are always ciphertext; decryption happens on the stack of
/// the code making a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConnection {
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub platform_user_id: String,
    pub platform_username: String,
    pub access_token_cipher: String,
    pub refresh_token_cipher: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub connected: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Opaque adapter-specific payload (chat ids, broadcaster ids, …).
    pub connection_data: serde_json::Value,
}

/// A user-defined `!command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCommand {
    pub id: String,
    pub tenant_id: TenantId,
    /// Stored lowercase, including the `!` prefix.
    pub name: String,
    pub response: String,
    pub cooldown_seconds: u32,
    pub is_active: bool,
    pub usage_count: u32,
    pub permission_level: PermissionLevel,
}

/// Moderation rule classifier kinds, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Toxic,
    Spam,
    Links,
    Caps,
    Symbols,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Toxic => "toxic",
            RuleType::Spam => "spam",
            RuleType::Links => "links",
            RuleType::Caps => "caps",
            RuleType::Symbols => "symbols",
        }
    }

    /// The contractual evaluation order of the moderation chain.
    pub fn ordered() -> [RuleType; 5] {
        [
            RuleType::Toxic,
            RuleType::Spam,
            RuleType::Links,
            RuleType::Caps,
            RuleType::Symbols,
        ]
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "toxic" => Ok(RuleType::Toxic),
            "spam" => Ok(RuleType::Spam),
            "links" => Ok(RuleType::Links),
            "caps" => Ok(RuleType::Caps),
            "symbols" => Ok(RuleType::Symbols),
            other => Err(format!("unknown rule type: {}", other)),
        }
    }
}

/// What a fired moderation rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModAction {
    Allow,
    Warn,
    Timeout,
    Ban,
}

impl ModAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModAction::Allow => "allow",
            ModAction::Warn => "warn",
            ModAction::Timeout => "timeout",
            ModAction::Ban => "ban",
        }
    }
}

impl std::str::FromStr for ModAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "allow" => Ok(ModAction::Allow),
            "warn" => Ok(ModAction::Warn),
            "timeout" => Ok(ModAction::Timeout),
            "ban" => Ok(ModAction::Ban),
            other => Err(format!("unknown moderation action: {}", other)),
        }
    }
}

/// Severity of a detected violation. Ordered low < medium < high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// One enabled/disabled moderation rule for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationRule {
    pub tenant_id: TenantId,
    pub rule_type: RuleType,
    pub enabled: bool,
    pub action: ModAction,
    pub severity_threshold: Severity,
    pub timeout_seconds: u32,
}

/// Giveaway lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GiveawayStatus {
    Active,
    Drawn,
    Cancelled,
}

impl GiveawayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GiveawayStatus::Active => "active",
            GiveawayStatus::Drawn => "drawn",
            GiveawayStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for GiveawayStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(GiveawayStatus::Active),
            "drawn" => Ok(GiveawayStatus::Drawn),
            "cancelled" => Ok(GiveawayStatus::Cancelled),
            other => Err(format!("unknown giveaway status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Giveaway {
    pub id: String,
    pub tenant_id: TenantId,
    pub title: String,
    pub keyword: String,
    pub requires_subscription: bool,
    pub max_winners: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: GiveawayStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiveawayEntry {
    pub giveaway_id: String,
    pub username: String,
    pub platform: Platform,
    pub is_subscriber: bool,
    pub entered_at: DateTime<Utc>,
}

/// A user's channel-point balance on one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBalance {
    pub tenant_id: TenantId,
    pub username: String,
    pub platform: Platform,
    pub balance: i64,
}

/// Per-tenant currency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencySettings {
    pub tenant_id: TenantId,
    pub enabled: bool,
    pub currency_name: String,
    pub earn_per_message: i64,
}

impl CurrencySettings {
    pub fn defaults(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            enabled: false,
            currency_name: "points".to_string(),
            earn_per_message: 1,
        }
    }
}

/// Per-tenant chat-game settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSettings {
    pub tenant_id: TenantId,
    pub enabled: bool,
    /// Per-(user, game) cooldown, in minutes.
    pub cooldown_minutes: u32,
    pub trivia_points: i64,
}

impl GameSettings {
    pub fn defaults(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            enabled: true,
            cooldown_minutes: 2,
            trivia_points: 50,
        }
    }
}

/// Per-tenant shoutout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoutoutSettings {
    pub tenant_id: TenantId,
    pub enabled: bool,
    pub auto_shoutout_on_raid: bool,
    /// Template rendered with {user}; falls back to a stock line when empty.
    pub template: String,
}

impl ShoutoutSettings {
    pub fn defaults(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            enabled: true,
            auto_shoutout_on_raid: false,
            template: "Go check out {user}! They are awesome!".to_string(),
        }
    }
}

/// Per-tenant alerting preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSettings {
    pub tenant_id: TenantId,
    pub notify_token_expiry: bool,
    pub notify_errors: bool,
}

impl AlertSettings {
    pub fn defaults(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            notify_token_expiry: true,
            notify_errors: true,
        }
    }
}

/// A durable bus event awaiting consumer acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub tenant_id: TenantId,
    pub seq: u64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub acked: bool,
}
