pub mod config;
pub mod crypto;
pub mod error;
pub mod types;

pub use error::{EmberError, Result};
pub use types::{
    BotEvent, BotEventKind, ChatAction, ChatEvent, ChatTags, PermissionLevel, Platform, RaidEvent,
    TenantId,
};
