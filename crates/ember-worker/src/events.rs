//! Per-tenant event fan-out for the SSE surface.
//!
//! Ordinary kinds ride a tokio broadcast channel (per-subscriber FIFO,
//! best-effort under lag). `giveaway_entry` events are additionally written
//! to the store-backed outbox and replayed to new subscribers until acked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;

use ember_core::types::{BotEvent, BotEventKind, TenantId};
use ember_store::Store;

const BROADCAST_CAPACITY: usize = 256;
/// Acked outbox rows kept around for debugging before pruning.
const OUTBOX_KEEP: u64 = 512;

/// Fan-out events to all subscribers of a tenant.
pub struct EventBus {
    channels: DashMap<TenantId, broadcast::Sender<BotEvent>>,
    seq: AtomicU64,
    outbox: Arc<Store>,
}

impl EventBus {
    pub fn new(outbox: Arc<Store>) -> Self {
        Self {
            channels: DashMap::new(),
            seq: AtomicU64::new(1),
            outbox,
        }
    }

    /// Emit an event to every subscriber of the tenant.
    ///
    /// Durable kinds are persisted first and carry the outbox's own
    /// per-tenant sequence number, so a seq received live acks exactly the
    /// rows a replayed seq would. Non-durable kinds use the process-wide
    /// counter (their seq is ordering-only and never acked). A full
    /// broadcast buffer only costs lagging subscribers the non-durable
    /// kinds.
    pub fn emit(&self, tenant: &TenantId, kind: BotEventKind, payload: serde_json::Value) {
        let seq = if kind.is_durable() {
            match self.outbox.outbox_append(tenant, kind.as_str(), &payload) {
                Ok(seq) => {
                    let _ = self.outbox.outbox_prune(tenant, OUTBOX_KEEP);
                    seq
                }
                Err(e) => {
                    // Deliver live anyway; the event just loses durability.
                    warn!(tenant = %tenant, error = %e, "failed to persist durable event");
                    self.seq.fetch_add(1, Ordering::Relaxed)
                }
            }
        } else {
            self.seq.fetch_add(1, Ordering::Relaxed)
        };

        let event = BotEvent {
            tenant: tenant.clone(),
            kind,
            payload,
            seq,
            at: Utc::now(),
        };

        let sender = self
            .channels
            .entry(tenant.clone())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0);
        // No subscribers is fine; durable kinds are already on disk.
        let _ = sender.send(event);
    }

    /// Subscribe to a tenant's live events. Returns the unacked durable
    /// backlog to replay first, then the live receiver.
    pub fn subscribe(&self, tenant: &TenantId) -> (Vec<BotEvent>, broadcast::Receiver<BotEvent>) {
        let receiver = self
            .channels
            .entry(tenant.clone())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe();

        let backlog = self
            .outbox
            .outbox_unacked(tenant)
            .unwrap_or_default()
            .into_iter()
            .map(|row| BotEvent {
                tenant: tenant.clone(),
                kind: BotEventKind::GiveawayEntry,
                payload: row.payload,
                seq: row.seq,
                at: Utc::now(),
            })
            .collect();
        (backlog, receiver)
    }

    /// Acknowledge durable events up to `seq` for a tenant.
    pub fn ack(&self, tenant: &TenantId, seq: u64) {
        if let Err(e) = self.outbox.outbox_ack(tenant, seq) {
            warn!(tenant = %tenant, error = %e, "event ack failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> EventBus {
        EventBus::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = bus();
        let tenant = TenantId::from("t1");
        let (_backlog, mut rx) = bus.subscribe(&tenant);

        bus.emit(&tenant, BotEventKind::StatusChanged, serde_json::json!({"s": 1}));
        bus.emit(&tenant, BotEventKind::NewMessage, serde_json::json!({"s": 2}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, BotEventKind::StatusChanged);
        assert_eq!(second.kind, BotEventKind::NewMessage);
        assert!(first.seq < second.seq);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let bus = bus();
        let (_b, mut rx_a) = bus.subscribe(&TenantId::from("a"));
        bus.emit(&TenantId::from("b"), BotEventKind::Error, serde_json::json!({}));
        assert!(matches!(
            rx_a.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn giveaway_entries_replay_until_acked() {
        let bus = bus();
        let tenant = TenantId::from("t1");

        // emitted with no subscriber at all
        bus.emit(
            &tenant,
            BotEventKind::GiveawayEntry,
            serde_json::json!({"username": "alice"}),
        );
        bus.emit(
            &tenant,
            BotEventKind::GiveawayEntry,
            serde_json::json!({"username": "bob"}),
        );
        // non-durable kind with no subscriber simply vanishes
        bus.emit(&tenant, BotEventKind::NewMessage, serde_json::json!({}));

        let (backlog, _rx) = bus.subscribe(&tenant);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].payload["username"], "alice");

        bus.ack(&tenant, backlog[1].seq);
        let (backlog, _rx) = bus.subscribe(&tenant);
        assert!(backlog.is_empty());
    }

    #[tokio::test]
    async fn live_durable_seq_matches_outbox_and_acks_exactly() {
        let bus = bus();
        let tenant = TenantId::from("t1");
        let (_backlog, mut rx) = bus.subscribe(&tenant);

        // Non-durable traffic first, so the global counter runs well ahead
        // of the tenant's outbox numbering.
        for _ in 0..5 {
            bus.emit(&tenant, BotEventKind::NewMessage, serde_json::json!({}));
        }
        bus.emit(
            &tenant,
            BotEventKind::GiveawayEntry,
            serde_json::json!({"username": "alice"}),
        );
        bus.emit(
            &tenant,
            BotEventKind::GiveawayEntry,
            serde_json::json!({"username": "bob"}),
        );

        // Collect the two durable events as a live subscriber sees them.
        let mut durable = Vec::new();
        for _ in 0..7 {
            let event = rx.recv().await.unwrap();
            if event.kind == BotEventKind::GiveawayEntry {
                durable.push(event);
            }
        }
        assert_eq!(durable.len(), 2);
        // Live seqs are the outbox's own per-tenant numbering, not the
        // global counter (which is already past 5 here).
        assert_eq!(durable[0].seq, 1);
        assert_eq!(durable[1].seq, 2);

        // Acking with the seq received live clears exactly that row.
        bus.ack(&tenant, durable[0].seq);
        let (backlog, _rx) = bus.subscribe(&tenant);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].seq, durable[1].seq);
        assert_eq!(backlog[0].payload["username"], "bob");
    }
}
