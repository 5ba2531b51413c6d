//! YouTube Live adapter — the live-chat REST surface, polled from a
//! background task so the worker sees an event stream like any socket
//! platform.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ember_core::config::DEFAULT_TIMEOUT_MS;
use ember_core::types::{ChatTags, Platform};

use crate::adapter::{PlatformAdapter, PlatformSession};
use crate::error::AdapterError;
use crate::types::{chat_event, SendOutcome, SessionCredentials, SessionEvent, StreamInfo};

const YT_BASE: &str = "https://www.googleapis.com/youtube/v3";
/// YouTube live chat rejects messages longer than 200 characters.
const MESSAGE_MAX_CHARS: usize = 200;
/// Floor for the server-suggested polling interval.
const MIN_POLL_MS: u64 = 2_000;
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct YoutubeAdapter;

impl YoutubeAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for YoutubeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for YoutubeAdapter {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn connect(
        &self,
        creds: SessionCredentials,
    ) -> Result<Box<dyn PlatformSession>, AdapterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .unwrap_or_default();

        let (live_chat_id, video_id) = resolve_active_broadcast(&http, &creds).await?;
        info!(video = %video_id, "youtube live chat resolved");

        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        // Chat authors keyed by display name so moderation can find the
        // channel id the ban API requires.
        let authors: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(poll_chat(
            http.clone(),
            creds.clone(),
            live_chat_id.clone(),
            event_tx,
            authors.clone(),
            cancel.clone(),
        ));

        Ok(Box::new(YoutubeSession {
            creds,
            http,
            live_chat_id,
            video_id,
            authors,
            events: Some(event_rx),
            cancel,
        }))
    }
}

/// Find the tenant's active broadcast and its chat id.
async fn resolve_active_broadcast(
    http: &reqwest::Client,
    creds: &SessionCredentials,
) -> Result<(String, String), AdapterError> {
    #[derive(Deserialize)]
    struct Broadcasts {
        items: Vec<Broadcast>,
    }
    #[derive(Deserialize)]
    struct Broadcast {
        id: String,
        snippet: BroadcastSnippet,
    }
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct BroadcastSnippet {
        live_chat_id: Option<String>,
    }

    let resp = http
        .get(format!("{}/liveBroadcasts", YT_BASE))
        .query(&[
            ("part", "snippet"),
            ("broadcastStatus", "active"),
            ("mine", "true"),
        ])
        .bearer_auth(&creds.access_token)
        .send()
        .await?;
    if resp.status().as_u16() == 401 {
        return Err(AdapterError::AuthFailed("liveBroadcasts 401".to_string()));
    }
    let broadcasts: Broadcasts = resp
        .json()
        .await
        .map_err(|e| AdapterError::Protocol(e.to_string()))?;
    let broadcast = broadcasts.items.into_iter().next().ok_or_else(|| {
        AdapterError::ChannelResolution("no active live broadcast".to_string())
    })?;
    let chat_id = broadcast.snippet.live_chat_id.ok_or_else(|| {
        AdapterError::ChannelResolution("broadcast has no live chat".to_string())
    })?;
    Ok((chat_id, broadcast.id))
}

/// The polling loop. The first page is history and is consumed silently;
/// every later page becomes chat events.
async fn poll_chat(
    http: reqwest::Client,
    creds: SessionCredentials,
    live_chat_id: String,
    event_tx: mpsc::Sender<SessionEvent>,
    authors: Arc<Mutex<HashMap<String, String>>>,
    cancel: CancellationToken,
) {
    let mut page_token: Option<String> = None;
    let mut first_page = true;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut query: Vec<(&str, String)> = vec![
            ("liveChatId", live_chat_id.clone()),
            ("part", "snippet,authorDetails".to_string()),
        ];
        if let Some(token) = &page_token {
            query.push(("pageToken", token.clone()));
        }

        let resp = http
            .get(format!("{}/liveChat/messages", YT_BASE))
            .query(&query)
            .bearer_auth(&creds.access_token)
            .send()
            .await;

        let mut wait_ms = MIN_POLL_MS;
        match resp {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<ChatPage>().await {
                    Ok(page) => {
                        wait_ms = page.polling_interval_millis.max(MIN_POLL_MS);
                        page_token = page.next_page_token;
                        if first_page {
                            // backlog from before we connected
                            first_page = false;
                        } else {
                            for item in page.items {
                                let Some(author) = item.author_details else { continue };
                                let Some(text) = item
                                    .snippet
                                    .as_ref()
                                    .and_then(|s| s.display_message.clone())
                                else {
                                    continue;
                                };
                                authors
                                    .lock()
                                    .unwrap()
                                    .insert(author.display_name.to_lowercase(), author.channel_id.clone());
                                let tags = ChatTags {
                                    is_subscriber: author.is_chat_sponsor,
                                    is_moderator: author.is_chat_moderator,
                                    is_broadcaster: author.is_chat_owner,
                                    badges: Default::default(),
                                };
                                let event = chat_event(
                                    Platform::Youtube,
                                    &creds.channel,
                                    &author.display_name,
                                    &text,
                                    tags,
                                );
                                if event_tx.send(SessionEvent::Chat(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "youtube chat page parse failed"),
                }
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                if status == 401 || status == 403 {
                    let _ = event_tx
                        .send(SessionEvent::Closed {
                            reason: format!("youtube auth error {}", status),
                        })
                        .await;
                    return;
                }
                if status == 404 {
                    // chat ended with the broadcast
                    let _ = event_tx
                        .send(SessionEvent::Closed {
                            reason: "live chat ended".to_string(),
                        })
                        .await;
                    return;
                }
                warn!(status, "youtube chat poll failed");
                wait_ms = MIN_POLL_MS * 2;
            }
            Err(e) => {
                warn!(error = %e, "youtube chat poll transport error");
                wait_ms = MIN_POLL_MS * 2;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
            _ = cancel.cancelled() => break,
        }
    }
    debug!("youtube poll task stopped");
}

struct YoutubeSession {
    creds: SessionCredentials,
    http: reqwest::Client,
    live_chat_id: String,
    video_id: String,
    authors: Arc<Mutex<HashMap<String, String>>>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    cancel: CancellationToken,
}

impl YoutubeSession {
    fn author_channel_id(&self, username: &str) -> Option<String> {
        self.authors
            .lock()
            .unwrap()
            .get(&username.to_lowercase())
            .cloned()
    }

    /// Temporary or permanent ban through the liveChat/bans endpoint.
    async fn chat_ban(&self, username: &str, duration: Option<u32>) -> SendOutcome {
        let Some(channel_id) = self.author_channel_id(username) else {
            return SendOutcome::Transient {
                reason: format!("no channel id on record for {}", username),
            };
        };

        let mut snippet = serde_json::json!({
            "liveChatId": self.live_chat_id,
            "type": if duration.is_some() { "temporary" } else { "permanent" },
            "bannedUserDetails": { "channelId": channel_id },
        });
        if let Some(secs) = duration {
            snippet["banDurationSeconds"] = serde_json::json!(secs);
        }

        let resp = self
            .http
            .post(format!("{}/liveChat/bans", YT_BASE))
            .query(&[("part", "snippet")])
            .bearer_auth(&self.creds.access_token)
            .json(&serde_json::json!({ "snippet": snippet }))
            .send()
            .await;
        crate::twitch::outcome_from_response(resp).await
    }
}

#[async_trait]
impl PlatformSession for YoutubeSession {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    async fn send(&self, _channel: &str, text: &str) -> SendOutcome {
        let text: String = text.chars().take(MESSAGE_MAX_CHARS).collect();
        let resp = self
            .http
            .post(format!("{}/liveChat/messages", YT_BASE))
            .query(&[("part", "snippet")])
            .bearer_auth(&self.creds.access_token)
            .json(&serde_json::json!({
                "snippet": {
                    "liveChatId": self.live_chat_id,
                    "type": "textMessageEvent",
                    "textMessageDetails": { "messageText": text },
                }
            }))
            .send()
            .await;
        crate::twitch::outcome_from_response(resp).await
    }

    async fn timeout_user(
        &self,
        _channel: &str,
        username: &str,
        seconds: u32,
        _reason: &str,
    ) -> SendOutcome {
        self.chat_ban(username, Some(seconds.max(1))).await
    }

    async fn ban_user(&self, _channel: &str, username: &str, _reason: &str) -> SendOutcome {
        self.chat_ban(username, None).await
    }

    async fn stream_info(&self, _channel: &str) -> Result<StreamInfo, AdapterError> {
        #[derive(Deserialize)]
        struct Videos {
            items: Vec<Video>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Video {
            live_streaming_details: Option<LiveDetails>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct LiveDetails {
            concurrent_viewers: Option<String>,
            actual_end_time: Option<String>,
        }

        let resp = self
            .http
            .get(format!("{}/videos", YT_BASE))
            .query(&[
                ("part", "liveStreamingDetails"),
                ("id", self.video_id.as_str()),
            ])
            .bearer_auth(&self.creds.access_token)
            .send()
            .await?;
        let videos: Videos = resp
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;
        let details = videos
            .items
            .into_iter()
            .next()
            .and_then(|v| v.live_streaming_details);
        Ok(match details {
            Some(d) if d.actual_end_time.is_none() => StreamInfo {
                live: true,
                viewer_count: d
                    .concurrent_viewers
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            },
            _ => StreamInfo::default(),
        })
    }

    async fn close(&self) {
        self.cancel.cancel();
    }
}

// liveChat/messages page (private — deserialization only)

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatPage {
    #[serde(default)]
    polling_interval_millis: u64,
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<ChatItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatItem {
    snippet: Option<ChatSnippet>,
    author_details: Option<AuthorDetails>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatSnippet {
    display_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorDetails {
    display_name: String,
    channel_id: String,
    #[serde(default)]
    is_chat_moderator: bool,
    #[serde(default)]
    is_chat_owner: bool,
    #[serde(default)]
    is_chat_sponsor: bool,
}
