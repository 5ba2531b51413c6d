//! Bounded inbound chat buffer between platform ingestion and the serial
//! pipeline executor.
//!
//! Under overflow the oldest non-command message is dropped first, so a
//! chat flood can never starve `!commands`. A `dropped` counter records the
//! loss.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use ember_core::types::ChatEvent;

pub struct InboundQueue {
    buffer: Mutex<VecDeque<ChatEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an event, evicting under overflow. Never blocks.
    pub fn push(&self, event: ChatEvent) {
        {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.len() >= self.capacity {
                // Evict the oldest non-command; if the buffer is all
                // commands, an inbound non-command is the one to lose.
                if let Some(pos) = buffer.iter().position(|e| !e.is_command()) {
                    buffer.remove(pos);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("inbound buffer full, dropped oldest chat message");
                } else if !event.is_command() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                // commands always fit, at worst one past capacity
            }
            buffer.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Pop the next event, waiting until one arrives.
    pub async fn pop(&self) -> ChatEvent {
        loop {
            if let Some(event) = self.buffer.lock().unwrap().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking pop (drain on shutdown).
    pub fn try_pop(&self) -> Option<ChatEvent> {
        self.buffer.lock().unwrap().pop_front()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ember_core::types::{ChatTags, Platform};

    fn event(text: &str) -> ChatEvent {
        ChatEvent {
            platform: Platform::Twitch,
            channel: "c".to_string(),
            username: "u".to_string(),
            text: text.to_string(),
            tags: ChatTags::default(),
            arrived_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fifo_order_under_capacity() {
        let queue = InboundQueue::new(8);
        queue.push(event("one"));
        queue.push(event("two"));
        assert_eq!(queue.pop().await.text, "one");
        assert_eq!(queue.pop().await.text, "two");
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_non_command() {
        let queue = InboundQueue::new(3);
        queue.push(event("chat-1"));
        queue.push(event("!cmd"));
        queue.push(event("chat-2"));
        queue.push(event("chat-3")); // overflow: chat-1 evicted

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await.text, "!cmd");
        assert_eq!(queue.pop().await.text, "chat-2");
        assert_eq!(queue.pop().await.text, "chat-3");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn commands_survive_a_flood() {
        let queue = InboundQueue::new(4);
        queue.push(event("!keep"));
        for i in 0..100 {
            queue.push(event(&format!("flood {}", i)));
        }
        // the command is still there
        let mut saw_command = false;
        while let Some(e) = queue.try_pop() {
            if e.text == "!keep" {
                saw_command = true;
            }
        }
        assert!(saw_command);
        assert_eq!(queue.dropped(), 97);
    }

    #[tokio::test]
    async fn incoming_chat_dropped_when_buffer_is_all_commands() {
        let queue = InboundQueue::new(2);
        queue.push(event("!a"));
        queue.push(event("!b"));
        queue.push(event("plain chat"));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);
    }
}
