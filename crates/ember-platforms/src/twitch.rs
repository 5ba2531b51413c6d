//! Twitch adapter — IRC-style chat over WebSocket, moderation and stream
//! metadata over Helix REST.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ember_core::config::DEFAULT_TIMEOUT_MS;
use ember_core::types::{ChatTags, Platform};

use crate::adapter::{PlatformAdapter, PlatformSession};
use crate::error::AdapterError;
use crate::irc::IrcMessage;
use crate::types::{
    chat_event, raid_event, SendOutcome, SessionCredentials, SessionEvent, StreamInfo,
};

const TWITCH_IRC_WS: &str = "wss://irc-ws.chat.twitch.tv:443";
const HELIX_BASE: &str = "https://api.twitch.tv/helix";
/// Twitch rejects messages longer than 500 characters.
const MESSAGE_MAX_CHARS: usize = 500;
/// Inbound event channel depth before the reader applies backpressure.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct TwitchAdapter {
    client_id: String,
}

impl TwitchAdapter {
    pub fn new(client_id: String) -> Self {
        Self { client_id }
    }
}

#[async_trait]
impl PlatformAdapter for TwitchAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    async fn connect(
        &self,
        creds: SessionCredentials,
    ) -> Result<Box<dyn PlatformSession>, AdapterError> {
        let (ws, _) = connect_async(TWITCH_IRC_WS)
            .await
            .map_err(|e| AdapterError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        // Writer task: raw IRC lines -> socket.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    line = out_rx.recv() => {
                        let Some(line) = line else { break };
                        if sink.send(Message::Text(line.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Handshake: request tags/commands capabilities, authenticate, join.
        let channel = creds.channel.to_lowercase();
        for line in [
            "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            format!("PASS oauth:{}", creds.access_token),
            format!("NICK {}", creds.username.to_lowercase()),
            format!("JOIN #{}", channel),
        ] {
            out_tx
                .send(line)
                .await
                .map_err(|_| AdapterError::ConnectionFailed("writer task gone".to_string()))?;
        }

        // Reader task: socket frames -> parsed session events.
        let reader_out = out_tx.clone();
        let reader_cancel = cancel.clone();
        let reader_channel = channel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = stream.next() => frame,
                    _ = reader_cancel.cancelled() => break,
                };
                let Some(Ok(frame)) = frame else {
                    let _ = event_tx
                        .send(SessionEvent::Closed {
                            reason: "socket closed".to_string(),
                        })
                        .await;
                    break;
                };
                let Ok(text) = frame.to_text() else { continue };
                for line in text.lines() {
                    let Some(msg) = IrcMessage::parse(line) else { continue };
                    match msg.command.as_str() {
                        "PING" => {
                            let pong = format!("PONG :{}", msg.trailing().unwrap_or("tmi.twitch.tv"));
                            let _ = reader_out.send(pong).await;
                        }
                        "PRIVMSG" => {
                            if let Some(event) = privmsg_to_event(&msg, &reader_channel) {
                                if event_tx.send(SessionEvent::Chat(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        "USERNOTICE" => {
                            if msg.tag("msg-id") == Some("raid") {
                                let raider = msg
                                    .tag("msg-param-login")
                                    .or_else(|| msg.tag("login"))
                                    .unwrap_or_default()
                                    .to_string();
                                let viewers = msg
                                    .tag("msg-param-viewerCount")
                                    .and_then(|v| v.parse().ok())
                                    .unwrap_or(0);
                                let _ = event_tx
                                    .send(SessionEvent::Raid(raid_event(
                                        Platform::Twitch,
                                        &reader_channel,
                                        &raider,
                                        viewers,
                                    )))
                                    .await;
                            }
                        }
                        "RECONNECT" => {
                            let _ = event_tx
                                .send(SessionEvent::Closed {
                                    reason: "server requested reconnect".to_string(),
                                })
                                .await;
                            return;
                        }
                        "NOTICE" => {
                            if msg.trailing().is_some_and(|t| t.contains("authentication failed")) {
                                warn!("twitch IRC authentication failed");
                                let _ = event_tx
                                    .send(SessionEvent::Closed {
                                        reason: "authentication failed".to_string(),
                                    })
                                    .await;
                                return;
                            }
                        }
                        _ => {}
                    }
                }
            }
        });

        info!(channel = %channel, "twitch session connected");

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .unwrap_or_default();

        Ok(Box::new(TwitchSession {
            creds,
            client_id: self.client_id.clone(),
            out_tx,
            events: Some(event_rx),
            http,
            cancel,
        }))
    }
}

/// Map a PRIVMSG frame onto the canonical chat event.
fn privmsg_to_event(msg: &IrcMessage, channel: &str) -> Option<ember_core::types::ChatEvent> {
    let username = msg
        .tag("display-name")
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| msg.nick().map(str::to_string))?;
    let text = msg.trailing()?;

    let badges: std::collections::HashSet<String> = msg
        .tag("badges")
        .unwrap_or_default()
        .split(',')
        .filter(|b| !b.is_empty())
        .filter_map(|b| b.split('/').next())
        .map(str::to_string)
        .collect();

    let tags = ChatTags {
        is_subscriber: msg.tag("subscriber") == Some("1") || badges.contains("subscriber"),
        is_moderator: msg.tag("mod") == Some("1") || badges.contains("moderator"),
        is_broadcaster: badges.contains("broadcaster"),
        badges,
    };
    Some(chat_event(Platform::Twitch, channel, &username, text, tags))
}

struct TwitchSession {
    creds: SessionCredentials,
    client_id: String,
    out_tx: mpsc::Sender<String>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    http: reqwest::Client,
    cancel: CancellationToken,
}

impl TwitchSession {
    /// Resolve a login name to a Helix user id (needed by the ban API).
    async fn resolve_user_id(&self, login: &str) -> Result<String, SendOutcome> {
        #[derive(Deserialize)]
        struct Users {
            data: Vec<User>,
        }
        #[derive(Deserialize)]
        struct User {
            id: String,
        }

        let resp = self
            .http
            .get(format!("{}/users", HELIX_BASE))
            .query(&[("login", login.to_lowercase())])
            .bearer_auth(&self.creds.access_token)
            .header("Client-Id", &self.client_id)
            .send()
            .await
            .map_err(|e| SendOutcome::Transient {
                reason: e.to_string(),
            })?;

        match resp.status().as_u16() {
            200 => {
                let users: Users = resp.json().await.map_err(|e| SendOutcome::Transient {
                    reason: e.to_string(),
                })?;
                users
                    .data
                    .into_iter()
                    .next()
                    .map(|u| u.id)
                    .ok_or(SendOutcome::Transient {
                        reason: format!("unknown user {}", login),
                    })
            }
            401 => Err(SendOutcome::AuthError),
            status => Err(SendOutcome::Transient {
                reason: format!("helix users returned {}", status),
            }),
        }
    }

    /// Issue a Helix ban — `duration = None` is permanent.
    async fn helix_ban(
        &self,
        username: &str,
        duration: Option<u32>,
        reason: &str,
    ) -> SendOutcome {
        let user_id = match self.resolve_user_id(username).await {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let mut data = serde_json::json!({
            "user_id": user_id,
            "reason": reason,
        });
        if let Some(secs) = duration {
            data["duration"] = serde_json::json!(secs);
        }

        let resp = self
            .http
            .post(format!("{}/moderation/bans", HELIX_BASE))
            .query(&[
                ("broadcaster_id", self.creds.user_id.as_str()),
                ("moderator_id", self.creds.user_id.as_str()),
            ])
            .bearer_auth(&self.creds.access_token)
            .header("Client-Id", &self.client_id)
            .json(&serde_json::json!({ "data": data }))
            .send()
            .await;

        outcome_from_response(resp).await
    }
}

/// Translate an HTTP result into the adapter outcome contract. Shared by
/// every REST-backed adapter surface.
pub(crate) async fn outcome_from_response(
    resp: Result<reqwest::Response, reqwest::Error>,
) -> SendOutcome {
    match resp {
        Ok(resp) => match resp.status().as_u16() {
            200..=299 => SendOutcome::Sent,
            401 => SendOutcome::AuthError,
            429 => {
                let retry_after_ms = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| secs * 1000)
                    .unwrap_or(30_000);
                SendOutcome::Throttled { retry_after_ms }
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                SendOutcome::Transient {
                    reason: format!("status {}: {}", status, body),
                }
            }
        },
        Err(e) => SendOutcome::Transient {
            reason: e.to_string(),
        },
    }
}

#[async_trait]
impl PlatformSession for TwitchSession {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    async fn send(&self, channel: &str, text: &str) -> SendOutcome {
        let text: String = text.chars().take(MESSAGE_MAX_CHARS).collect();
        let line = format!("PRIVMSG #{} :{}", channel.to_lowercase(), text);
        match self.out_tx.send(line).await {
            Ok(()) => {
                debug!(channel = %channel, "twitch message sent");
                SendOutcome::Sent
            }
            Err(_) => SendOutcome::Transient {
                reason: "IRC writer closed".to_string(),
            },
        }
    }

    async fn timeout_user(
        &self,
        _channel: &str,
        username: &str,
        seconds: u32,
        reason: &str,
    ) -> SendOutcome {
        self.helix_ban(username, Some(seconds.max(1)), reason).await
    }

    async fn ban_user(&self, _channel: &str, username: &str, reason: &str) -> SendOutcome {
        self.helix_ban(username, None, reason).await
    }

    async fn stream_info(&self, _channel: &str) -> Result<StreamInfo, AdapterError> {
        #[derive(Deserialize)]
        struct Streams {
            data: Vec<Stream>,
        }
        #[derive(Deserialize)]
        struct Stream {
            viewer_count: u32,
        }

        let resp = self
            .http
            .get(format!("{}/streams", HELIX_BASE))
            .query(&[("user_id", self.creds.user_id.as_str())])
            .bearer_auth(&self.creds.access_token)
            .header("Client-Id", &self.client_id)
            .send()
            .await?;
        if resp.status().as_u16() == 401 {
            return Err(AdapterError::AuthFailed("helix streams 401".to_string()));
        }
        let streams: Streams = resp
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;
        Ok(match streams.data.first() {
            Some(stream) => StreamInfo {
                live: true,
                viewer_count: stream.viewer_count,
            },
            None => StreamInfo::default(),
        })
    }

    async fn close(&self) {
        let _ = self.out_tx.send("QUIT".to_string()).await;
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> IrcMessage {
        IrcMessage::parse(line).unwrap()
    }

    #[test]
    fn privmsg_maps_tags_to_chat_event() {
        let msg = parse(
            "@badges=broadcaster/1;display-name=StreamerGal;mod=0;subscriber=0 \
             :streamergal!streamergal@streamergal.tmi.twitch.tv PRIVMSG #streamergal :hi chat",
        );
        let event = privmsg_to_event(&msg, "streamergal").unwrap();
        assert_eq!(event.username, "StreamerGal");
        assert_eq!(event.text, "hi chat");
        assert!(event.tags.is_broadcaster);
        assert!(!event.tags.is_subscriber);
    }

    #[test]
    fn subscriber_flag_from_tag_or_badge() {
        let tagged = parse(
            "@badges=;display-name=A;mod=0;subscriber=1 :a!a@a.tmi.twitch.tv PRIVMSG #c :x",
        );
        assert!(privmsg_to_event(&tagged, "c").unwrap().tags.is_subscriber);

        let badged = parse(
            "@badges=subscriber/12;display-name=B;mod=0;subscriber=0 \
             :b!b@b.tmi.twitch.tv PRIVMSG #c :x",
        );
        assert!(privmsg_to_event(&badged, "c").unwrap().tags.is_subscriber);
    }

    #[test]
    fn falls_back_to_nick_without_display_name() {
        let msg = parse(":carol!carol@carol.tmi.twitch.tv PRIVMSG #c :hello");
        assert_eq!(privmsg_to_event(&msg, "c").unwrap().username, "carol");
    }
}
