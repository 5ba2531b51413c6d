//! Spotify adapter — read-only "now playing" metadata for the `!song`
//! command. There is no chat: the event stream closes immediately and every
//! outbound operation reports `AuthError` by contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use ember_core::config::DEFAULT_TIMEOUT_MS;
use ember_core::types::Platform;

use crate::adapter::{PlatformAdapter, PlatformSession};
use crate::error::AdapterError;
use crate::types::{NowPlaying, SendOutcome, SessionCredentials, SessionEvent, StreamInfo};

const SPOTIFY_BASE: &str = "https://api.spotify.com/v1";

pub struct SpotifyAdapter;

impl SpotifyAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SpotifyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for SpotifyAdapter {
    fn platform(&self) -> Platform {
        Platform::Spotify
    }

    async fn connect(
        &self,
        creds: SessionCredentials,
    ) -> Result<Box<dyn PlatformSession>, AdapterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .unwrap_or_default();
        // No chat stream: hand the worker an already-closed receiver.
        let (_tx, rx) = mpsc::channel::<SessionEvent>(1);
        Ok(Box::new(SpotifySession {
            creds,
            http,
            events: Some(rx),
        }))
    }
}

struct SpotifySession {
    creds: SessionCredentials,
    http: reqwest::Client,
    events: Option<mpsc::Receiver<SessionEvent>>,
}

#[async_trait]
impl PlatformSession for SpotifySession {
    fn platform(&self) -> Platform {
        Platform::Spotify
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    async fn send(&self, _channel: &str, _text: &str) -> SendOutcome {
        SendOutcome::AuthError
    }

    async fn timeout_user(
        &self,
        _channel: &str,
        _username: &str,
        _seconds: u32,
        _reason: &str,
    ) -> SendOutcome {
        SendOutcome::AuthError
    }

    async fn ban_user(&self, _channel: &str, _username: &str, _reason: &str) -> SendOutcome {
        SendOutcome::AuthError
    }

    async fn stream_info(&self, _channel: &str) -> Result<StreamInfo, AdapterError> {
        Ok(StreamInfo::default())
    }

    async fn now_playing(&self) -> Option<NowPlaying> {
        #[derive(Deserialize)]
        struct Playing {
            item: Option<Track>,
            #[serde(default)]
            is_playing: bool,
        }
        #[derive(Deserialize)]
        struct Track {
            name: String,
            artists: Vec<Artist>,
        }
        #[derive(Deserialize)]
        struct Artist {
            name: String,
        }

        let resp = self
            .http
            .get(format!("{}/me/player/currently-playing", SPOTIFY_BASE))
            .bearer_auth(&self.creds.access_token)
            .send()
            .await
            .ok()?;
        // 204 means nothing is playing.
        if resp.status().as_u16() != 200 {
            debug!(status = resp.status().as_u16(), "spotify: nothing playing");
            return None;
        }
        let playing: Playing = resp.json().await.ok()?;
        if !playing.is_playing {
            return None;
        }
        let track = playing.item?;
        Some(NowPlaying {
            artist: track
                .artists
                .into_iter()
                .map(|a| a.name)
                .collect::<Vec<_>>()
                .join(", "),
            track: track.name,
        })
    }

    async fn close(&self) {}
}
