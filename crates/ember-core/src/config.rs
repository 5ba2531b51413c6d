use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::Platform;

pub const DEFAULT_PORT: u16 = 8710;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default deadline for any external HTTP call.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Deadline for platform health probes.
pub const HEALTH_TIMEOUT_MS: u64 = 5_000;
/// Deadline for OAuth code/refresh exchanges.
pub const OAUTH_TIMEOUT_MS: u64 = 15_000;

/// Worker heartbeat cadence.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
/// Viewer snapshot cadence.
pub const VIEWER_SNAPSHOT_INTERVAL_SECS: u64 = 300;
/// Bounded inbound chat channel per platform connection.
pub const INBOUND_CHANNEL_CAPACITY: usize = 1024;
/// Maximum queue items claimed per drain pass.
pub const OUTBOUND_CLAIM_BATCH: usize = 100;
/// Forced-abandon deadline for worker drain.
pub const DRAIN_DEADLINE_SECS: u64 = 10;

/// Minimum accepted length for SESSION_SECRET, in bytes.
const MIN_SESSION_SECRET_BYTES: usize = 32;

/// Top-level config (ember.toml + EMBER_* env overrides + the documented
/// raw environment keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmberConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub platforms: PlatformAppsConfig,
    #[serde(default)]
    pub ai: AiConfig,
    /// Optional shared cache for quota counters. Accepted but unused by the
    /// in-process store; logged once at startup when set.
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Key material for token-at-rest encryption and overlay URL signing.
    /// Must be at least 32 bytes.
    #[serde(default)]
    pub session_secret: String,
    /// Bearer token expected on every control-plane request.
    #[serde(default)]
    pub service_auth_token: String,
}

/// OAuth application credentials for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformAppsConfig {
    pub twitch: Option<OAuthAppConfig>,
    pub youtube: Option<OAuthAppConfig>,
    pub kick: Option<OAuthAppConfig>,
    pub spotify: Option<OAuthAppConfig>,
}

impl PlatformAppsConfig {
    pub fn get(&self, platform: Platform) -> Option<&OAuthAppConfig> {
        match platform {
            Platform::Twitch => self.twitch.as_ref(),
            Platform::Youtube => self.youtube.as_ref(),
            Platform::Kick => self.kick.as_ref(),
            Platform::Spotify => self.spotify.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// When true, only the local Ollama endpoint is used and no text leaves
    /// the host. The toxicity classifier is disabled in this mode.
    #[serde(default)]
    pub local_only: bool,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            local_only: false,
            ollama_url: default_ollama_url(),
            openai_api_key: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.ember/ember.db", home)
}

impl EmberConfig {
    /// Load config from a TOML file with EMBER_* env overrides, then apply
    /// the documented raw environment keys and validate.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. EMBER_CONFIG env var
    ///   3. ~/.ember/ember.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("EMBER_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let mut config: EmberConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("EMBER_").split("__"))
            .extract()
            .map_err(|e| crate::error::EmberError::ConfigInvalid(e.to_string()))?;

        config.apply_raw_env();
        config.validate()?;
        Ok(config)
    }

    /// The deployment surface documents flat keys (SESSION_SECRET,
    /// TWITCH_CLIENT_ID, …) that predate the EMBER_ prefix. They win over
    /// file values so rotations need no file edit.
    pub fn apply_raw_env(&mut self) {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        if let Some(v) = env("SESSION_SECRET") {
            self.security.session_secret = v;
        }
        if let Some(v) = env("SERVICE_AUTH_TOKEN") {
            self.security.service_auth_token = v;
        }
        if let Some(v) = env("DATABASE_URL") {
            self.database.path = v;
        }
        if let Some(v) = env("REDIS_URL") {
            self.redis_url = Some(v);
        }
        if let Some(v) = env("OPENAI_API_KEY") {
            self.ai.openai_api_key = Some(v);
        }
        if let Some(v) = env("OLLAMA_URL") {
            self.ai.ollama_url = v;
        }
        if let Some(v) = env("LOCAL_AI_ONLY") {
            self.ai.local_only = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes");
        }

        for platform in Platform::all() {
            let prefix = platform.as_str().to_uppercase();
            let slot = match platform {
                Platform::Twitch => &mut self.platforms.twitch,
                Platform::Youtube => &mut self.platforms.youtube,
                Platform::Kick => &mut self.platforms.kick,
                Platform::Spotify => &mut self.platforms.spotify,
            };
            if let (Some(client_id), Some(client_secret), Some(redirect_uri)) = (
                env(&format!("{}_CLIENT_ID", prefix)),
                env(&format!("{}_CLIENT_SECRET", prefix)),
                env(&format!("{}_REDIRECT_URI", prefix)),
            ) {
                *slot = Some(OAuthAppConfig {
                    client_id,
                    client_secret,
                    redirect_uri,
                });
            }
        }
    }

    /// Startup validation. A bad secret is fatal — there is no safe default.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.security.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::EmberError::ConfigInvalid(format!(
                "SESSION_SECRET must be at least {} bytes (got {})",
                MIN_SESSION_SECRET_BYTES,
                self.security.session_secret.len()
            )));
        }
        if self.security.service_auth_token.is_empty() {
            return Err(crate::error::EmberError::ConfigInvalid(
                "SERVICE_AUTH_TOKEN must be set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EmberConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
            platforms: PlatformAppsConfig::default(),
            ai: AiConfig::default(),
            redis_url: None,
        }
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.ember/ember.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EmberConfig {
        EmberConfig {
            security: SecurityConfig {
                session_secret: "0123456789abcdef0123456789abcdef".to_string(),
                service_auth_token: "svc-token".to_string(),
            },
            ..EmberConfig::default()
        }
    }

    #[test]
    fn short_session_secret_is_rejected() {
        let mut config = valid_config();
        config.security.session_secret = "too-short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_service_token_is_rejected() {
        let mut config = valid_config();
        config.security.service_auth_token.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn platform_app_lookup() {
        let mut config = valid_config();
        config.platforms.twitch = Some(OAuthAppConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            redirect_uri: "https://example.com/cb".into(),
        });
        assert!(config.platforms.get(Platform::Twitch).is_some());
        assert!(config.platforms.get(Platform::Kick).is_none());
    }
}
