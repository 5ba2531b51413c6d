use async_trait::async_trait;
use tokio::sync::mpsc;

use ember_core::types::Platform;

use crate::error::AdapterError;
use crate::types::{NowPlaying, SendOutcome, SessionCredentials, SessionEvent, StreamInfo};

/// Common interface implemented by every platform adapter
/// (Twitch, YouTube, Kick, Spotify).
///
/// Implementations must be `Send + Sync` so a worker can hold them and
/// drive sessions from multiple Tokio tasks.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Which platform this adapter speaks for.
    fn platform(&self) -> Platform;

    /// Establish a live session for one tenant's connection.
    ///
    /// Implementations spawn whatever transport tasks they need (socket
    /// reader, poller) and surface inbound traffic through the session's
    /// event receiver.
    async fn connect(
        &self,
        creds: SessionCredentials,
    ) -> Result<Box<dyn PlatformSession>, AdapterError>;
}

/// One live connection to a platform.
#[async_trait]
pub trait PlatformSession: Send + Sync {
    fn platform(&self) -> Platform;

    /// Take the inbound event stream. Yields chat and raid events until the
    /// transport closes; callable once (subsequent calls return `None`).
    fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>>;

    /// Post a chat message.
    ///
    /// This is intentionally `&self` so a connected session can send
    /// concurrently without a mutable borrow.
    async fn send(&self, channel: &str, text: &str) -> SendOutcome;

    /// Temporarily silence a user.
    async fn timeout_user(
        &self,
        channel: &str,
        username: &str,
        seconds: u32,
        reason: &str,
    ) -> SendOutcome;

    /// Permanently remove a user.
    async fn ban_user(&self, channel: &str, username: &str, reason: &str) -> SendOutcome;

    /// Public stream metadata for the viewer snapshot task.
    async fn stream_info(&self, channel: &str) -> Result<StreamInfo, AdapterError>;

    /// Currently-playing track, on platforms that expose one.
    async fn now_playing(&self) -> Option<NowPlaying> {
        None
    }

    /// Close the transport. Best-effort; must not block shutdown.
    async fn close(&self);
}
