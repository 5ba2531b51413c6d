pub mod db;
pub mod error;
pub mod manager;
pub mod oauth;
pub mod types;

pub use db::TokenStore;
pub use error::{Result, TokenError};
pub use manager::{GuardHooks, TokenManager};
pub use types::{AlertType, OAuthSession, RotationType, TokenSet};
