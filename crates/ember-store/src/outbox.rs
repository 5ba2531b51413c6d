use ember_core::types::TenantId;

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::OutboxEvent;

impl Store {
    /// Append a durable bus event. Sequence numbers are allocated by the
    /// database so concurrent workers cannot collide.
    pub fn outbox_append(
        &self,
        tenant: &TenantId,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let next: u64 = db.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM event_outbox WHERE tenant_id = ?1",
            rusqlite::params![tenant.as_str()],
            |row| row.get(0),
        )?;
        db.execute(
            "INSERT INTO event_outbox (tenant_id, seq, kind, payload, acked)
             VALUES (?1,?2,?3,?4,0)",
            rusqlite::params![tenant.as_str(), next, kind, serde_json::to_string(payload)?],
        )?;
        Ok(next)
    }

    /// Unacknowledged events, oldest first — replayed to new subscribers.
    pub fn outbox_unacked(&self, tenant: &TenantId) -> Result<Vec<OutboxEvent>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT seq, kind, payload FROM event_outbox
             WHERE tenant_id = ?1 AND acked = 0 ORDER BY seq",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|(seq, kind, payload)| OutboxEvent {
                tenant_id: tenant.clone(),
                seq,
                kind,
                payload: serde_json::from_str(&payload).unwrap_or_default(),
                acked: false,
            })
            .collect())
    }

    /// Acknowledge every event up to and including `up_to_seq`.
    pub fn outbox_ack(&self, tenant: &TenantId, up_to_seq: u64) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE event_outbox SET acked = 1
             WHERE tenant_id = ?1 AND acked = 0 AND seq <= ?2",
            rusqlite::params![tenant.as_str(), up_to_seq],
        )?;
        Ok(changed)
    }

    /// Drop acknowledged rows older than the newest `keep` events.
    pub fn outbox_prune(&self, tenant: &TenantId, keep: u64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM event_outbox
             WHERE tenant_id = ?1 AND acked = 1
               AND seq <= (SELECT COALESCE(MAX(seq), 0) - ?2 FROM event_outbox WHERE tenant_id = ?1)",
            rusqlite::params![tenant.as_str(), keep],
        )
        .map_err(StoreError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_monotonic_seq() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let payload = serde_json::json!({"username": "alice"});
        assert_eq!(store.outbox_append(&tenant, "giveaway_entry", &payload).unwrap(), 1);
        assert_eq!(store.outbox_append(&tenant, "giveaway_entry", &payload).unwrap(), 2);
        // sequences are per-tenant
        assert_eq!(
            store
                .outbox_append(&TenantId::from("t2"), "giveaway_entry", &payload)
                .unwrap(),
            1
        );
    }

    #[test]
    fn unacked_replay_then_ack() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let payload = serde_json::json!({"username": "alice"});
        store.outbox_append(&tenant, "giveaway_entry", &payload).unwrap();
        store.outbox_append(&tenant, "giveaway_entry", &payload).unwrap();
        store.outbox_append(&tenant, "giveaway_entry", &payload).unwrap();

        assert_eq!(store.outbox_unacked(&tenant).unwrap().len(), 3);
        assert_eq!(store.outbox_ack(&tenant, 2).unwrap(), 2);

        let remaining = store.outbox_unacked(&tenant).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].seq, 3);

        // acking again is a no-op
        assert_eq!(store.outbox_ack(&tenant, 2).unwrap(), 0);
    }
}
