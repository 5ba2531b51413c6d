//! OAuth 2.0 authorization-code + PKCE plumbing.
//!
//! State and verifier generation, provider authorize/token endpoints, the
//! code and refresh exchanges, and the post-exchange identity lookup.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use ember_core::config::{OAuthAppConfig, OAUTH_TIMEOUT_MS};
use ember_core::types::Platform;

use crate::error::{Result, TokenError};
use crate::types::TokenSet;

/// Opaque CSRF state: 32 random bytes (256 bits), base64url.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    B64URL.encode(bytes)
}

/// PKCE verifier: 64 random bytes → 86 base64url chars (within the
/// RFC 7636 43–128 range).
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    OsRng.fill_bytes(&mut bytes);
    B64URL.encode(bytes)
}

/// S256 challenge for a verifier.
pub fn code_challenge(verifier: &str) -> String {
    B64URL.encode(Sha256::digest(verifier.as_bytes()))
}

/// Provider endpoints per platform.
fn authorize_endpoint(platform: Platform) -> &'static str {
    match platform {
        Platform::Twitch => "https://id.twitch.tv/oauth2/authorize",
        Platform::Youtube => "https://accounts.google.com/o/oauth2/v2/auth",
        Platform::Kick => "https://id.kick.com/oauth/authorize",
        Platform::Spotify => "https://accounts.spotify.com/authorize",
    }
}

fn token_endpoint(platform: Platform) -> &'static str {
    match platform {
        Platform::Twitch => "https://id.twitch.tv/oauth2/token",
        Platform::Youtube => "https://oauth2.googleapis.com/token",
        Platform::Kick => "https://id.kick.com/oauth/token",
        Platform::Spotify => "https://accounts.spotify.com/api/token",
    }
}

/// Scopes requested at authorization time.
pub fn default_scopes(platform: Platform) -> &'static str {
    match platform {
        Platform::Twitch => "chat:read chat:edit channel:moderate moderator:manage:banned_users",
        Platform::Youtube => {
            "https://www.googleapis.com/auth/youtube.readonly \
             https://www.googleapis.com/auth/youtube.force-ssl"
        }
        Platform::Kick => "chat:write events:subscribe",
        Platform::Spotify => "user-read-currently-playing user-read-playback-state",
    }
}

/// Who the exchanged token belongs to on the platform.
#[derive(Debug, Clone)]
pub struct PlatformIdentity {
    pub user_id: String,
    pub username: String,
}

/// Provider-facing OAuth client. One instance serves every platform.
pub struct OAuthFlow {
    client: reqwest::Client,
}

impl OAuthFlow {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(OAUTH_TIMEOUT_MS))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Build the provider authorize URL for a prepared handshake.
    pub fn authorize_url(
        &self,
        platform: Platform,
        app: &OAuthAppConfig,
        state: &str,
        verifier: &str,
    ) -> Result<String> {
        let mut url = Url::parse(authorize_endpoint(platform))
            .map_err(|e| TokenError::Parse(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &app.client_id)
                .append_pair("redirect_uri", &app.redirect_uri)
                .append_pair("scope", default_scopes(platform))
                .append_pair("state", state)
                .append_pair("code_challenge", &code_challenge(verifier))
                .append_pair("code_challenge_method", "S256");
            if platform == Platform::Youtube {
                // Google only issues a refresh token with offline access.
                query
                    .append_pair("access_type", "offline")
                    .append_pair("prompt", "consent");
            }
        }
        Ok(url.into())
    }

    /// Exchange an authorization code (+ PKCE verifier) for tokens.
    pub async fn exchange_code(
        &self,
        platform: Platform,
        app: &OAuthAppConfig,
        code: &str,
        verifier: &str,
    ) -> Result<TokenSet> {
        debug!(platform = %platform, "exchanging authorization code");
        self.token_request(
            platform,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &app.redirect_uri),
                ("client_id", &app.client_id),
                ("client_secret", &app.client_secret),
                ("code_verifier", verifier),
            ],
        )
        .await
    }

    /// Exchange a refresh token for a fresh token set.
    pub async fn refresh(
        &self,
        platform: Platform,
        app: &OAuthAppConfig,
        refresh_token: &str,
    ) -> Result<TokenSet> {
        debug!(platform = %platform, "refreshing access token");
        self.token_request(
            platform,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &app.client_id),
                ("client_secret", &app.client_secret),
            ],
        )
        .await
    }

    async fn token_request(&self, platform: Platform, form: &[(&str, &str)]) -> Result<TokenSet> {
        let resp = self
            .client
            .post(token_endpoint(platform))
            .form(form)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            // A revoked/consumed refresh token is permanent — the caller
            // must disconnect rather than retry.
            if body.contains("invalid_grant") {
                return Err(TokenError::RefreshRevoked(body));
            }
            return Err(TokenError::ExchangeFailed {
                status,
                message: body,
            });
        }
        Ok(resp.json::<TokenSet>().await?)
    }

    /// Resolve who the token belongs to. Called once after a successful
    /// code exchange to fill the connection row.
    pub async fn fetch_identity(
        &self,
        platform: Platform,
        app: &OAuthAppConfig,
        access_token: &str,
    ) -> Result<PlatformIdentity> {
        match platform {
            Platform::Twitch => {
                #[derive(Deserialize)]
                struct Users {
                    data: Vec<TwitchUser>,
                }
                #[derive(Deserialize)]
                struct TwitchUser {
                    id: String,
                    login: String,
                }
                let users: Users = self
                    .get_json(
                        "https://api.twitch.tv/helix/users",
                        access_token,
                        &[("Client-Id", app.client_id.as_str())],
                    )
                    .await?;
                let user = users
                    .data
                    .into_iter()
                    .next()
                    .ok_or_else(|| TokenError::Parse("helix returned no user".to_string()))?;
                Ok(PlatformIdentity {
                    user_id: user.id,
                    username: user.login,
                })
            }
            Platform::Youtube => {
                let value: serde_json::Value = self
                    .get_json(
                        "https://www.googleapis.com/youtube/v3/channels?part=snippet&mine=true",
                        access_token,
                        &[],
                    )
                    .await?;
                let channel = value["items"]
                    .get(0)
                    .ok_or_else(|| TokenError::Parse("no youtube channel".to_string()))?;
                Ok(PlatformIdentity {
                    user_id: channel["id"].as_str().unwrap_or_default().to_string(),
                    username: channel["snippet"]["title"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                })
            }
            Platform::Kick => {
                let value: serde_json::Value = self
                    .get_json("https://api.kick.com/public/v1/users", access_token, &[])
                    .await?;
                let user = value["data"]
                    .get(0)
                    .cloned()
                    .unwrap_or_else(|| value.clone());
                Ok(PlatformIdentity {
                    user_id: user["user_id"]
                        .as_u64()
                        .map(|id| id.to_string())
                        .or_else(|| user["user_id"].as_str().map(String::from))
                        .unwrap_or_default(),
                    username: user["name"].as_str().unwrap_or_default().to_string(),
                })
            }
            Platform::Spotify => {
                let value: serde_json::Value = self
                    .get_json("https://api.spotify.com/v1/me", access_token, &[])
                    .await?;
                Ok(PlatformIdentity {
                    user_id: value["id"].as_str().unwrap_or_default().to_string(),
                    username: value["display_name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                })
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<T> {
        let mut req = self.client.get(url).bearer_auth(access_token);
        for (name, value) in extra_headers {
            req = req.header(*name, *value);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(TokenError::ExchangeFailed {
                status,
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json::<T>().await?)
    }
}

impl Default for OAuthFlow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_long_and_unique() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        // 32 bytes base64url → 43 chars ⇒ ≥ 128 bits of entropy
        assert!(a.len() >= 43);
    }

    #[test]
    fn verifier_length_in_rfc_range() {
        let v = generate_verifier();
        assert!((43..=128).contains(&v.len()), "got {}", v.len());
    }

    #[test]
    fn challenge_matches_rfc7636_vector() {
        // Appendix B of RFC 7636
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn authorize_url_carries_pkce_params() {
        let flow = OAuthFlow::new();
        let app = OAuthAppConfig {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            redirect_uri: "https://example.com/auth/twitch/callback".into(),
        };
        let url = flow
            .authorize_url(Platform::Twitch, &app, "the-state", "the-verifier")
            .unwrap();
        assert!(url.starts_with("https://id.twitch.tv/oauth2/authorize?"));
        assert!(url.contains("state=the-state"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains(&format!("code_challenge={}", code_challenge("the-verifier"))));
        // the secret never appears in the authorize URL
        assert!(!url.contains("secret"));
    }

    #[test]
    fn youtube_requests_offline_access() {
        let flow = OAuthFlow::new();
        let app = OAuthAppConfig {
            client_id: "cid".into(),
            client_secret: "s".into(),
            redirect_uri: "https://example.com/cb".into(),
        };
        let url = flow
            .authorize_url(Platform::Youtube, &app, "s", "v")
            .unwrap();
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }
}
