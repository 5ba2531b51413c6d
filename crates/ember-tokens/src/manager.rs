//! Token lifecycle: proactive refresh, rotation history, expiry alerts,
//! and the 401/429 reactions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use ember_core::config::PlatformAppsConfig;
use ember_core::crypto::TokenCipher;
use ember_core::types::{Platform, TenantId};
use ember_store::Store;

use crate::db::TokenStore;
use crate::error::{Result, TokenError};
use crate::oauth::{generate_state, generate_verifier, OAuthFlow};
use crate::types::{AlertType, RotationType, TokenRotation, TokenSet};

/// Refresh when the access token is within this many minutes of expiry.
const REFRESH_AHEAD_MINUTES: i64 = 5;

/// Circuit-breaker hooks, injected as function values.
///
/// The breaker also consults this manager's 429 handling, so a crate
/// dependency either way would be cyclic; closures break the cycle.
pub struct GuardHooks {
    pub record_success: Box<dyn Fn(Platform, Option<f64>) + Send + Sync>,
    pub record_failure: Box<dyn Fn(Platform) + Send + Sync>,
    pub record_throttle: Box<dyn Fn(Platform, Duration) + Send + Sync>,
}

impl GuardHooks {
    /// Hooks that record nowhere — tests and tooling.
    pub fn noop() -> Self {
        Self {
            record_success: Box::new(|_, _| {}),
            record_failure: Box::new(|_| {}),
            record_throttle: Box::new(|_, _| {}),
        }
    }
}

/// Did a platform response indicate dead credentials?
pub fn is_unauthorized(status: u16, body: &str) -> bool {
    status == 401 || body.contains("invalid_token") || body.contains("unauthorized")
}

/// OAuth and refresh lifecycle for every tenant's platform credentials.
pub struct TokenManager {
    store: Arc<Store>,
    tokens: Arc<TokenStore>,
    cipher: Arc<TokenCipher>,
    flow: OAuthFlow,
    apps: PlatformAppsConfig,
    hooks: GuardHooks,
}

impl TokenManager {
    pub fn new(
        store: Arc<Store>,
        tokens: Arc<TokenStore>,
        cipher: Arc<TokenCipher>,
        apps: PlatformAppsConfig,
        hooks: GuardHooks,
    ) -> Self {
        Self {
            store,
            tokens,
            cipher,
            flow: OAuthFlow::new(),
            apps,
            hooks,
        }
    }

    /// Begin an OAuth handshake: persist the single-use session and return
    /// the provider authorize URL to redirect the user to.
    pub fn begin_oauth(
        &self,
        tenant: &TenantId,
        platform: Platform,
        ip_address: Option<&str>,
    ) -> Result<String> {
        let app = self
            .apps
            .get(platform)
            .ok_or(TokenError::AppNotConfigured(platform))?;

        let state = generate_state();
        let verifier = generate_verifier();
        self.tokens
            .create_oauth_session(&state, tenant, platform, &verifier, ip_address)?;
        self.flow.authorize_url(platform, app, &state, &verifier)
    }

    /// Complete the handshake: atomically consume the state, exchange the
    /// code, resolve the platform identity, and store ciphertext.
    pub async fn complete_oauth(&self, state: &str, code: &str) -> Result<(TenantId, Platform)> {
        let session = self.tokens.consume_oauth_session(state)?;
        let platform = session.platform;
        let app = self
            .apps
            .get(platform)
            .ok_or(TokenError::AppNotConfigured(platform))?;

        let token_set = self
            .flow
            .exchange_code(platform, app, code, &session.code_verifier)
            .await?;
        let identity = self
            .flow
            .fetch_identity(platform, app, &token_set.access_token)
            .await?;

        let connection = ember_store::PlatformConnection {
            tenant_id: session.tenant_id.clone(),
            platform,
            platform_user_id: identity.user_id,
            platform_username: identity.username,
            access_token_cipher: self.cipher.encrypt(&token_set.access_token)?,
            refresh_token_cipher: token_set
                .refresh_token
                .as_deref()
                .map(|t| self.cipher.encrypt(t))
                .transpose()?,
            token_expires_at: token_set.expires_at(),
            connected: true,
            last_connected_at: Some(Utc::now()),
            connection_data: serde_json::Value::Object(Default::default()),
        };
        self.store.upsert_connection(&connection)?;
        info!(tenant = %session.tenant_id, platform = %platform, "oauth connection established");
        Ok((session.tenant_id, platform))
    }

    /// Tear down a connection (user-initiated disconnect).
    pub fn disconnect(&self, tenant: &TenantId, platform: Platform) -> Result<()> {
        self.store.delete_connection(tenant, platform)?;
        self.tokens.acknowledge_alerts(tenant, platform, None)?;
        Ok(())
    }

    /// Return a plaintext access token, refreshing first when it is within
    /// the refresh-ahead window. The plaintext lives only on this stack.
    pub async fn access_token(&self, tenant: &TenantId, platform: Platform) -> Result<String> {
        let connection = self
            .store
            .connection(tenant, platform)?
            .filter(|c| c.connected)
            .ok_or_else(|| TokenError::NotConnected {
                tenant: tenant.to_string(),
                platform,
            })?;

        let needs_refresh = connection
            .token_expires_at
            .map(|at| at - Utc::now() <= chrono::Duration::minutes(REFRESH_AHEAD_MINUTES))
            .unwrap_or(false);

        if needs_refresh {
            self.refresh_connection(tenant, platform, RotationType::Scheduled)
                .await?;
            let refreshed = self
                .store
                .connection(tenant, platform)?
                .ok_or_else(|| TokenError::NotConnected {
                    tenant: tenant.to_string(),
                    platform,
                })?;
            return Ok(self.cipher.decrypt(&refreshed.access_token_cipher)?);
        }

        Ok(self.cipher.decrypt(&connection.access_token_cipher)?)
    }

    /// Run one refresh-token exchange and rotate the stored ciphertext.
    ///
    /// Permanent failures (revoked grant, 400/401) mark the connection
    /// disconnected and raise `refresh_failed`; transient network failures
    /// leave the connection intact for a later attempt.
    pub async fn refresh_connection(
        &self,
        tenant: &TenantId,
        platform: Platform,
        rotation_type: RotationType,
    ) -> Result<()> {
        let app = self
            .apps
            .get(platform)
            .ok_or(TokenError::AppNotConfigured(platform))?;
        let connection = self
            .store
            .connection(tenant, platform)?
            .ok_or_else(|| TokenError::NotConnected {
                tenant: tenant.to_string(),
                platform,
            })?;
        let refresh_cipher = connection.refresh_token_cipher.as_deref().ok_or_else(|| {
            TokenError::RefreshRevoked("no refresh token on record".to_string())
        })?;
        let refresh_token = self.cipher.decrypt(refresh_cipher)?;

        match self.flow.refresh(platform, app, &refresh_token).await {
            Ok(token_set) => {
                (self.hooks.record_success)(platform, None);
                self.apply_rotation(tenant, platform, &connection, token_set, rotation_type)
            }
            Err(err) => {
                (self.hooks.record_failure)(platform);
                let permanent = matches!(
                    &err,
                    TokenError::RefreshRevoked(_)
                        | TokenError::ExchangeFailed { status: 400, .. }
                        | TokenError::ExchangeFailed { status: 401, .. }
                );
                self.tokens.record_rotation(&TokenRotation {
                    tenant_id: tenant.clone(),
                    platform,
                    rotation_type,
                    previous_expires_at: connection.token_expires_at,
                    new_expires_at: None,
                    success: false,
                    error_message: Some(err.to_string()),
                    rotated_at: Utc::now(),
                })?;
                if permanent {
                    warn!(tenant = %tenant, platform = %platform, error = %err, "refresh token rejected, disconnecting");
                    self.store.set_connected(tenant, platform, false)?;
                    self.tokens.raise_alert(
                        tenant,
                        platform,
                        AlertType::RefreshFailed,
                        connection.token_expires_at,
                    )?;
                }
                Err(err)
            }
        }
    }

    fn apply_rotation(
        &self,
        tenant: &TenantId,
        platform: Platform,
        previous: &ember_store::PlatformConnection,
        token_set: TokenSet,
        rotation_type: RotationType,
    ) -> Result<()> {
        let new_expires = token_set.expires_at();
        let new_access = self.cipher.encrypt(&token_set.access_token)?;
        let new_refresh = token_set
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt(t))
            .transpose()?;

        self.store.rotate_tokens(
            tenant,
            platform,
            &previous.access_token_cipher,
            &new_access,
            new_refresh.as_deref(),
            new_expires,
        )?;
        self.tokens.record_rotation(&TokenRotation {
            tenant_id: tenant.clone(),
            platform,
            rotation_type,
            previous_expires_at: previous.token_expires_at,
            new_expires_at: new_expires,
            success: true,
            error_message: None,
            rotated_at: Utc::now(),
        })?;
        info!(tenant = %tenant, platform = %platform, kind = rotation_type.as_str(), "token rotated");
        Ok(())
    }

    /// React to a 401 from any platform call: one refresh attempt, type
    /// `on_error`. The original call is not retried here — that decision
    /// belongs to the caller.
    pub async fn handle_unauthorized(&self, tenant: &TenantId, platform: Platform) -> Result<()> {
        self.refresh_connection(tenant, platform, RotationType::OnError)
            .await
    }

    /// React to a 429: hand the Retry-After window to the breaker's
    /// throttle via the injected hook.
    pub fn handle_rate_limited(&self, platform: Platform, retry_after: Duration) {
        (self.hooks.record_throttle)(platform, retry_after);
    }

    /// Periodic expiry scan over every connected connection.
    ///
    /// Raises `expired` / `1hr_warning` / `24hr_warning`; raising is
    /// idempotent per (tenant, platform, type) while unacknowledged. Also
    /// prunes expired OAuth handshakes.
    pub fn expiry_scan(&self) -> Result<usize> {
        self.tokens.cleanup_expired_sessions()?;

        let now = Utc::now();
        let mut raised = 0;
        for (tenant, platform) in self.store.connected_connections()? {
            let Some(connection) = self.store.connection(&tenant, platform)? else {
                continue;
            };
            let Some(expires_at) = connection.token_expires_at else {
                continue;
            };
            let dt = expires_at - now;
            let alert = if dt <= chrono::Duration::zero() {
                AlertType::Expired
            } else if dt <= chrono::Duration::hours(1) {
                AlertType::Warning1h
            } else if dt <= chrono::Duration::hours(24) {
                AlertType::Warning24h
            } else {
                continue;
            };
            if self
                .tokens
                .raise_alert(&tenant, platform, alert, Some(expires_at))?
            {
                raised += 1;
            }
        }
        Ok(raised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn manager_with(store: Arc<Store>, tokens: Arc<TokenStore>, hooks: GuardHooks) -> TokenManager {
        TokenManager::new(
            store,
            tokens,
            Arc::new(TokenCipher::from_secret("0123456789abcdef0123456789abcdef")),
            PlatformAppsConfig::default(),
            hooks,
        )
    }

    fn seed_connection(
        store: &Store,
        cipher: &TokenCipher,
        tenant: &TenantId,
        platform: Platform,
        expires_in_minutes: i64,
    ) {
        store
            .upsert_connection(&ember_store::PlatformConnection {
                tenant_id: tenant.clone(),
                platform,
                platform_user_id: "u1".into(),
                platform_username: "alice".into(),
                access_token_cipher: cipher.encrypt("plain-access").unwrap(),
                refresh_token_cipher: Some(cipher.encrypt("plain-refresh").unwrap()),
                token_expires_at: Some(Utc::now() + chrono::Duration::minutes(expires_in_minutes)),
                connected: true,
                last_connected_at: None,
                connection_data: serde_json::json!({}),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn access_token_decrypts_fresh_token_without_refresh() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tokens = Arc::new(TokenStore::open_in_memory().unwrap());
        let cipher = TokenCipher::from_secret("0123456789abcdef0123456789abcdef");
        let tenant = TenantId::from("t1");
        seed_connection(&store, &cipher, &tenant, Platform::Twitch, 60);

        let manager = manager_with(store, tokens, GuardHooks::noop());
        let token = manager.access_token(&tenant, Platform::Twitch).await.unwrap();
        assert_eq!(token, "plain-access");
    }

    #[tokio::test]
    async fn access_token_requires_connected_row() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tokens = Arc::new(TokenStore::open_in_memory().unwrap());
        let manager = manager_with(store, tokens, GuardHooks::noop());
        let err = manager
            .access_token(&TenantId::from("ghost"), Platform::Twitch)
            .await;
        assert!(matches!(err, Err(TokenError::NotConnected { .. })));
    }

    #[test]
    fn expiry_scan_raises_tiered_alerts_idempotently() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tokens = Arc::new(TokenStore::open_in_memory().unwrap());
        let cipher = TokenCipher::from_secret("0123456789abcdef0123456789abcdef");

        let expired = TenantId::from("t-expired");
        let soon = TenantId::from("t-soon");
        let today = TenantId::from("t-today");
        let fine = TenantId::from("t-fine");
        seed_connection(&store, &cipher, &expired, Platform::Twitch, -5);
        seed_connection(&store, &cipher, &soon, Platform::Twitch, 30);
        seed_connection(&store, &cipher, &today, Platform::Twitch, 60 * 10);
        seed_connection(&store, &cipher, &fine, Platform::Twitch, 60 * 48);

        let manager = manager_with(store, tokens.clone(), GuardHooks::noop());
        assert_eq!(manager.expiry_scan().unwrap(), 3);

        let kinds = |tenant: &TenantId| -> Vec<AlertType> {
            tokens
                .active_alerts(tenant)
                .unwrap()
                .into_iter()
                .map(|a| a.alert_type)
                .collect()
        };
        assert_eq!(kinds(&expired), vec![AlertType::Expired]);
        assert_eq!(kinds(&soon), vec![AlertType::Warning1h]);
        assert_eq!(kinds(&today), vec![AlertType::Warning24h]);
        assert!(kinds(&fine).is_empty());

        // scan again — nothing new while alerts are unacknowledged
        assert_eq!(manager.expiry_scan().unwrap(), 0);
    }

    #[test]
    fn rate_limit_delegates_to_throttle_hook() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tokens = Arc::new(TokenStore::open_in_memory().unwrap());
        let throttled_ms = Arc::new(AtomicU64::new(0));
        let captured = throttled_ms.clone();
        let hooks = GuardHooks {
            record_success: Box::new(|_, _| {}),
            record_failure: Box::new(|_| {}),
            record_throttle: Box::new(move |_, d| {
                captured.store(d.as_millis() as u64, Ordering::SeqCst);
            }),
        };
        let manager = manager_with(store, tokens, hooks);
        manager.handle_rate_limited(Platform::Twitch, Duration::from_secs(17));
        assert_eq!(throttled_ms.load(Ordering::SeqCst), 17_000);
    }

    #[test]
    fn unauthorized_detection() {
        assert!(is_unauthorized(401, ""));
        assert!(is_unauthorized(400, r#"{"error":"invalid_token"}"#));
        assert!(is_unauthorized(403, "request was unauthorized"));
        assert!(!is_unauthorized(500, "internal error"));
    }
}
