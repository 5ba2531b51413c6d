pub mod commands;
pub mod configs;
pub mod connections;
pub mod currency;
pub mod db;
pub mod error;
pub mod giveaways;
pub mod moderation;
pub mod outbox;
pub mod store;
pub mod tenants;
pub mod types;

pub use error::{Result, StoreError};
pub use giveaways::EntryOutcome;
pub use store::Store;
pub use types::{
    AlertSettings, BotConfig, CurrencySettings, CustomCommand, GameSettings, Giveaway,
    GiveawayEntry, GiveawayStatus, IntervalMode, ModAction, ModerationRule, OutboxEvent,
    PlatformConnection, RuleType, Severity, ShoutoutSettings, Tenant, UserBalance,
};
