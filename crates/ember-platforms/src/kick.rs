//! Kick adapter — inbound chat over Kick's Pusher-protocol WebSocket,
//! outbound over the v2 REST API.
//!
//! The REST send surface is the least stable of the three chat platforms;
//! everything that touches it lives in this file so a contract change is a
//! one-file fix.

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
use crate::types::{chat_event, SendOutcome, SessionCredentials, SessionEvent, StreamInfo};

/// Kick's public Pusher application key, part of its published WS endpoint.
const KICK_PUSHER_URL: &str =
    "wss://ws-us2.pusher.com/app/32cbd69e4b950bf97679?protocol=7&client=js&version=8.4.0&flash=false";
const KICK_API_BASE: &str = "https://kick.com/api/v2";
const MESSAGE_MAX_CHARS: usize = 500;
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct KickAdapter;

impl KickAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KickAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for KickAdapter {
    fn platform(&self) -> Platform {
        Platform::Kick
    }

    async fn connect(
        &self,
        creds: SessionCredentials,
    ) -> Result<Box<dyn PlatformSession>, AdapterError> {
        let chatroom_id = creds
            .connection_data
            .get("chatroom_id")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| {
                AdapterError::ChannelResolution("connection_data.chatroom_id missing".to_string())
            })?;

        let (ws, _) = connect_async(KICK_PUSHER_URL)
            .await
            .map_err(|e| AdapterError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let subscribe = serde_json::json!({
            "event": "pusher:subscribe",
            "data": { "auth": "", "channel": format!("chatrooms.{}.v2", chatroom_id) },
        });
        sink.send(Message::Text(subscribe.to_string().into()))
            .await
            .map_err(|e| AdapterError::ConnectionFailed(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let reader_cancel = cancel.clone();
        let reader_channel = creds.channel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = stream.next() => frame,
                    _ = reader_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
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
                let Ok(envelope) = serde_json::from_str::<PusherEnvelope>(text) else {
                    continue;
                };
                match envelope.event.as_str() {
                    "pusher:ping" => {
                        let pong = serde_json::json!({"event": "pusher:pong", "data": {}});
                        let _ = sink.send(Message::Text(pong.to_string().into())).await;
                    }
                    "App\\Events\\ChatMessageEvent" => {
                        // Pusher double-encodes: data is a JSON string.
                        let Ok(message) =
                            serde_json::from_str::<KickChatMessage>(&envelope.data)
                        else {
                            warn!("unparseable kick chat payload");
                            continue;
                        };
                        let tags = ChatTags {
                            is_subscriber: message.sender.has_badge("subscriber"),
                            is_moderator: message.sender.has_badge("moderator"),
                            is_broadcaster: message.sender.has_badge("broadcaster"),
                            badges: message.sender.badge_set(),
                        };
                        let event = chat_event(
                            Platform::Kick,
                            &reader_channel,
                            &message.sender.username,
                            &message.content,
                            tags,
                        );
                        if event_tx.send(SessionEvent::Chat(event)).await.is_err() {
                            return;
                        }
                    }
                    _ => {}
                }
            }
        });

        info!(chatroom = chatroom_id, "kick session connected");

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .unwrap_or_default();

        Ok(Box::new(KickSession {
            creds,
            http,
            chatroom_id,
            events: Some(event_rx),
            cancel,
        }))
    }
}

struct KickSession {
    creds: SessionCredentials,
    http: reqwest::Client,
    chatroom_id: u64,
    events: Option<mpsc::Receiver<SessionEvent>>,
    cancel: CancellationToken,
}

#[async_trait]
impl PlatformSession for KickSession {
    fn platform(&self) -> Platform {
        Platform::Kick
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    async fn send(&self, _channel: &str, text: &str) -> SendOutcome {
        let text: String = text.chars().take(MESSAGE_MAX_CHARS).collect();
        let resp = self
            .http
            .post(format!(
                "{}/messages/send/{}",
                KICK_API_BASE, self.chatroom_id
            ))
            .bearer_auth(&self.creds.access_token)
            .json(&serde_json::json!({ "content": text, "type": "message" }))
            .send()
            .await;
        let outcome = crate::twitch::outcome_from_response(resp).await;
        if outcome == SendOutcome::Sent {
            debug!(chatroom = self.chatroom_id, "kick message sent");
        }
        outcome
    }

    async fn timeout_user(
        &self,
        channel: &str,
        username: &str,
        seconds: u32,
        _reason: &str,
    ) -> SendOutcome {
        // Kick expresses timeouts in minutes; round up so a short timeout
        // never becomes zero.
        let minutes = seconds.div_ceil(60).max(1);
        let resp = self
            .http
            .post(format!("{}/channels/{}/bans", KICK_API_BASE, channel))
            .bearer_auth(&self.creds.access_token)
            .json(&serde_json::json!({
                "banned_username": username,
                "duration": minutes,
                "permanent": false,
            }))
            .send()
            .await;
        crate::twitch::outcome_from_response(resp).await
    }

    async fn ban_user(&self, channel: &str, username: &str, _reason: &str) -> SendOutcome {
        let resp = self
            .http
            .post(format!("{}/channels/{}/bans", KICK_API_BASE, channel))
            .bearer_auth(&self.creds.access_token)
            .json(&serde_json::json!({
                "banned_username": username,
                "permanent": true,
            }))
            .send()
            .await;
        crate::twitch::outcome_from_response(resp).await
    }

    async fn stream_info(&self, channel: &str) -> Result<StreamInfo, AdapterError> {
        #[derive(Deserialize)]
        struct Channel {
            livestream: Option<Livestream>,
        }
        #[derive(Deserialize)]
        struct Livestream {
            #[serde(default)]
            viewer_count: u32,
        }

        let resp = self
            .http
            .get(format!("{}/channels/{}", KICK_API_BASE, channel))
            .send()
            .await?;
        let data: Channel = resp
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;
        Ok(match data.livestream {
            Some(live) => StreamInfo {
                live: true,
                viewer_count: live.viewer_count,
            },
            None => StreamInfo::default(),
        })
    }

    async fn close(&self) {
        self.cancel.cancel();
    }
}

// Pusher wire types (private — deserialization only)

#[derive(Deserialize)]
struct PusherEnvelope {
    event: String,
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
struct KickChatMessage {
    content: String,
    sender: KickSender,
}

#[derive(Deserialize)]
struct KickSender {
    username: String,
    #[serde(default)]
    identity: Option<KickIdentity>,
}

#[derive(Deserialize)]
struct KickIdentity {
    #[serde(default)]
    badges: Vec<KickBadge>,
}

#[derive(Deserialize)]
struct KickBadge {
    #[serde(rename = "type")]
    badge_type: String,
}

impl KickSender {
    fn has_badge(&self, badge: &str) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|i| i.badges.iter().any(|b| b.badge_type == badge))
    }

    fn badge_set(&self) -> std::collections::HashSet<String> {
        self.identity
            .as_ref()
            .map(|i| i.badges.iter().map(|b| b.badge_type.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_payload_parses() {
        // Shape observed on the chatrooms.<id>.v2 channel.
        let data = r#"{
            "id": "x",
            "content": "hello kick",
            "sender": {
                "id": 77,
                "username": "alice",
                "identity": { "badges": [{"type": "moderator", "text": "Moderator"}] }
            }
        }"#;
        let msg: KickChatMessage = serde_json::from_str(data).unwrap();
        assert_eq!(msg.content, "hello kick");
        assert!(msg.sender.has_badge("moderator"));
        assert!(!msg.sender.has_badge("subscriber"));
    }

    #[test]
    fn sender_without_identity_has_no_badges() {
        let msg: KickChatMessage =
            serde_json::from_str(r#"{"content": "x", "sender": {"username": "bob"}}"#).unwrap();
        assert!(msg.sender.badge_set().is_empty());
    }

    #[test]
    fn pusher_envelope_double_encoding() {
        let frame = r#"{"event":"App\\Events\\ChatMessageEvent","data":"{\"content\":\"hi\",\"sender\":{\"username\":\"a\"}}","channel":"chatrooms.5.v2"}"#;
        let envelope: PusherEnvelope = serde_json::from_str(frame).unwrap();
        assert_eq!(envelope.event, "App\\Events\\ChatMessageEvent");
        let inner: KickChatMessage = serde_json::from_str(&envelope.data).unwrap();
        assert_eq!(inner.content, "hi");
    }
}
