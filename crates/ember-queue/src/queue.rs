use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ember_core::types::{Platform, TenantId};

use crate::db::init_db;
use crate::error::{QueueError, Result};
use crate::types::{MessageStatus, QueueItem};

/// Default retry budget per item.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default priority for ordinary chat messages.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Durable outbound message backlog.
///
/// Drain order is (priority DESC, scheduled_for ASC) per platform. Failed
/// deliveries are rescheduled with exponential backoff (2^n seconds) until
/// the retry budget is exhausted, at which point the item is terminally
/// `failed`.
pub struct MessageQueue {
    db: Mutex<Connection>,
}

impl MessageQueue {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(QueueError::Database)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Enqueue an outbound message. `scheduled_for = None` means "now";
    /// priority is clamped to 0..10.
    pub fn enqueue(
        &self,
        tenant: &TenantId,
        platform: Platform,
        message_type: &str,
        content: &str,
        metadata: &serde_json::Value,
        priority: u8,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<QueueItem> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let scheduled = scheduled_for.unwrap_or(now);
        let priority = priority.min(10);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO message_queue
             (id, tenant_id, platform, message_type, content, metadata,
              status, priority, scheduled_for, retry_count, max_retries, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,'pending',?7,?8,0,?9,?10)",
            rusqlite::params![
                id,
                tenant.as_str(),
                platform.as_str(),
                message_type,
                content,
                serde_json::to_string(metadata)?,
                priority,
                scheduled.to_rfc3339(),
                DEFAULT_MAX_RETRIES,
                now.to_rfc3339(),
            ],
        )?;
        debug!(tenant = %tenant, platform = %platform, %message_type, "message enqueued");
        Ok(QueueItem {
            id,
            tenant_id: tenant.clone(),
            platform,
            message_type: message_type.to_string(),
            content: content.to_string(),
            metadata: metadata.clone(),
            status: MessageStatus::Pending,
            priority,
            scheduled_for: scheduled,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            processed_at: None,
        })
    }

    /// Claim up to `limit` due items for a platform and flip them to
    /// `processing`. Items whose retry budget is exhausted are never
    /// returned, so terminal rows cannot be redelivered.
    pub fn claim(&self, platform: Platform, limit: usize) -> Result<Vec<QueueItem>> {
        self.claim_inner(platform, None, limit)
    }

    /// Like [`claim`](Self::claim), scoped to one tenant's backlog — each
    /// worker drains only messages it holds a live session for.
    pub fn claim_for(
        &self,
        tenant: &TenantId,
        platform: Platform,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        self.claim_inner(platform, Some(tenant), limit)
    }

    fn claim_inner(
        &self,
        platform: Platform,
        tenant: Option<&TenantId>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let now = Utc::now().to_rfc3339();
        let tenant_filter = tenant.map(|t| t.as_str().to_string()).unwrap_or_default();
        let db = self.db.lock().unwrap();

        let items: Vec<QueueItem> = {
            let mut stmt = db.prepare_cached(
                "SELECT id, tenant_id, message_type, content, metadata, status,
                        priority, scheduled_for, retry_count, max_retries, last_error
                 FROM message_queue
                 WHERE platform = ?1
                   AND status IN ('pending', 'failed')
                   AND scheduled_for <= ?2
                   AND retry_count < max_retries
                   AND (?4 = '' OR tenant_id = ?4)
                 ORDER BY priority DESC, scheduled_for ASC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![platform.as_str(), now, limit as i64, tenant_filter],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, u8>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, u32>(8)?,
                        row.get::<_, u32>(9)?,
                        row.get::<_, Option<String>>(10)?,
                    ))
                },
            )?;
            rows.filter_map(|r| r.ok())
                .filter_map(
                    |(id, tenant, mtype, content, meta, status, priority, sched, retries, max, err)| {
                        Some(QueueItem {
                            id,
                            tenant_id: TenantId::from(tenant),
                            platform,
                            message_type: mtype,
                            content,
                            metadata: serde_json::from_str(&meta).unwrap_or_default(),
                            status: status.parse().ok()?,
                            priority,
                            scheduled_for: DateTime::parse_from_rfc3339(&sched)
                                .ok()?
                                .with_timezone(&Utc),
                            retry_count: retries,
                            max_retries: max,
                            last_error: err,
                            processed_at: None,
                        })
                    },
                )
                .collect()
        };

        for item in &items {
            db.execute(
                "UPDATE message_queue SET status = 'processing' WHERE id = ?1",
                rusqlite::params![item.id],
            )?;
        }
        Ok(items)
    }

    /// Resolve a claimed item.
    ///
    /// Failure path: while budget remains, increment the retry count and
    /// reschedule at `now + 2^retry_count` seconds (2 s, 4 s, 8 s); once the
    /// count reaches the budget the next failure is terminal and the count
    /// stays at `max_retries`.
    pub fn complete(&self, id: &str, success: bool, error: Option<&str>) -> Result<MessageStatus> {
        let now = Utc::now();
        let db = self.db.lock().unwrap();

        if success {
            let changed = db.execute(
                "UPDATE message_queue SET status = 'completed', processed_at = ?1 WHERE id = ?2",
                rusqlite::params![now.to_rfc3339(), id],
            )?;
            if changed == 0 {
                return Err(QueueError::NotFound { id: id.to_string() });
            }
            return Ok(MessageStatus::Completed);
        }

        let (retry_count, max_retries): (u32, u32) = db
            .query_row(
                "SELECT retry_count, max_retries FROM message_queue WHERE id = ?1",
                rusqlite::params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => QueueError::NotFound { id: id.to_string() },
                other => QueueError::Database(other),
            })?;

        if retry_count >= max_retries {
            warn!(item = %id, retries = retry_count, "message failed terminally");
            db.execute(
                "UPDATE message_queue SET status = 'failed', last_error = ?1, processed_at = ?2
                 WHERE id = ?3",
                rusqlite::params![error, now.to_rfc3339(), id],
            )?;
            return Ok(MessageStatus::Failed);
        }

        let next_retry = retry_count + 1;
        let delay = Duration::seconds(1i64 << next_retry.min(30));
        let next_attempt = now + delay;
        info!(
            item = %id,
            retry = next_retry,
            delay_secs = delay.num_seconds(),
            "message delivery failed, rescheduled"
        );
        db.execute(
            "UPDATE message_queue
             SET status = 'pending', retry_count = ?1, scheduled_for = ?2, last_error = ?3
             WHERE id = ?4",
            rusqlite::params![next_retry, next_attempt.to_rfc3339(), error, id],
        )?;
        Ok(MessageStatus::Pending)
    }

    /// Put a claimed item back without charging its retry budget — used when
    /// the guard (breaker open, quota) denies the send rather than the send
    /// itself failing.
    pub fn release(&self, id: &str, delay_ms: u64) -> Result<()> {
        let next = Utc::now() + Duration::milliseconds(delay_ms as i64);
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE message_queue SET status = 'pending', scheduled_for = ?1 WHERE id = ?2",
            rusqlite::params![next.to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(QueueError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Count of items still awaiting delivery for a platform.
    pub fn pending_count(&self, platform: Platform) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let count: u64 = db.query_row(
            "SELECT COUNT(*) FROM message_queue
             WHERE platform = ?1 AND status IN ('pending', 'processing')",
            rusqlite::params![platform.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Fetch a single item (status checks in tests and the status API).
    pub fn get(&self, id: &str) -> Result<QueueItem> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, tenant_id, platform, message_type, content, metadata, status,
                    priority, scheduled_for, retry_count, max_retries, last_error, processed_at
             FROM message_queue WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, u8>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, u32>(9)?,
                    row.get::<_, u32>(10)?,
                    row.get::<_, Option<String>>(11)?,
                    row.get::<_, Option<String>>(12)?,
                ))
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => QueueError::NotFound { id: id.to_string() },
            other => QueueError::Database(other),
        })
        .map(
            |(id, tenant, platform, mtype, content, meta, status, priority, sched, retries, max, err, processed)| {
                QueueItem {
                    id,
                    tenant_id: TenantId::from(tenant),
                    platform: platform.parse().unwrap_or(Platform::Twitch),
                    message_type: mtype,
                    content,
                    metadata: serde_json::from_str(&meta).unwrap_or_default(),
                    status: status.parse().unwrap_or(MessageStatus::Pending),
                    priority,
                    scheduled_for: DateTime::parse_from_rfc3339(&sched)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    retry_count: retries,
                    max_retries: max,
                    last_error: err,
                    processed_at: processed
                        .as_deref()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> MessageQueue {
        MessageQueue::open_in_memory().unwrap()
    }

    fn enqueue_simple(q: &MessageQueue, content: &str, priority: u8) -> QueueItem {
        q.enqueue(
            &TenantId::from("t1"),
            Platform::Twitch,
            "chat",
            content,
            &serde_json::json!({}),
            priority,
            None,
        )
        .unwrap()
    }

    #[test]
    fn claim_orders_by_priority_then_schedule() {
        let q = queue();
        enqueue_simple(&q, "low", 2);
        enqueue_simple(&q, "high", 9);
        enqueue_simple(&q, "mid", 5);

        let claimed = q.claim(Platform::Twitch, 10).unwrap();
        let contents: Vec<&str> = claimed.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["high", "mid", "low"]);

        // claimed items are processing, not claimable again
        assert!(q.claim(Platform::Twitch, 10).unwrap().is_empty());
    }

    #[test]
    fn future_items_are_not_claimed() {
        let q = queue();
        q.enqueue(
            &TenantId::from("t1"),
            Platform::Twitch,
            "chat",
            "later",
            &serde_json::json!({}),
            5,
            Some(Utc::now() + Duration::minutes(5)),
        )
        .unwrap();
        assert!(q.claim(Platform::Twitch, 10).unwrap().is_empty());
    }

    #[test]
    fn claim_is_per_platform_and_limited() {
        let q = queue();
        enqueue_simple(&q, "a", 5);
        enqueue_simple(&q, "b", 5);
        q.enqueue(
            &TenantId::from("t1"),
            Platform::Kick,
            "chat",
            "kick-msg",
            &serde_json::json!({}),
            5,
            None,
        )
        .unwrap();

        let claimed = q.claim(Platform::Twitch, 1).unwrap();
        assert_eq!(claimed.len(), 1);
        let kick = q.claim(Platform::Kick, 10).unwrap();
        assert_eq!(kick.len(), 1);
        assert_eq!(kick[0].content, "kick-msg");
    }

    #[test]
    fn success_is_terminal() {
        let q = queue();
        let item = enqueue_simple(&q, "msg", 5);
        q.claim(Platform::Twitch, 1).unwrap();
        assert_eq!(q.complete(&item.id, true, None).unwrap(), MessageStatus::Completed);

        let stored = q.get(&item.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Completed);
        assert!(stored.processed_at.is_some());
        // never redelivered
        assert!(q.claim(Platform::Twitch, 10).unwrap().is_empty());
    }

    #[test]
    fn failure_backoff_then_terminal() {
        let q = queue();
        let item = enqueue_simple(&q, "msg", 5);

        // failures 1..3 reschedule with 2s, 4s, 8s gaps
        for (n, expected_gap) in [(1u32, 2i64), (2, 4), (3, 8)] {
            let before = Utc::now();
            let status = q.complete(&item.id, false, Some("boom")).unwrap();
            assert_eq!(status, MessageStatus::Pending);
            let stored = q.get(&item.id).unwrap();
            assert_eq!(stored.retry_count, n);
            let gap = (stored.scheduled_for - before).num_seconds();
            assert!(
                (gap - expected_gap).abs() <= 1,
                "retry {} gap {}s, expected ~{}s",
                n,
                gap,
                expected_gap
            );
        }

        // 4th failure is terminal; count stays at the budget
        let status = q.complete(&item.id, false, Some("boom")).unwrap();
        assert_eq!(status, MessageStatus::Failed);
        let stored = q.get(&item.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
        assert_eq!(stored.retry_count, stored.max_retries);

        // terminal items are never claimed again
        assert!(q.claim(Platform::Twitch, 10).unwrap().is_empty());
    }

    #[test]
    fn release_does_not_charge_retry_budget() {
        let q = queue();
        let item = enqueue_simple(&q, "msg", 5);
        q.claim(Platform::Twitch, 1).unwrap();
        q.release(&item.id, 0).unwrap();

        let stored = q.get(&item.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Pending);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(q.claim(Platform::Twitch, 10).unwrap().len(), 1);
    }

    #[test]
    fn pending_count_tracks_backlog() {
        let q = queue();
        enqueue_simple(&q, "a", 5);
        enqueue_simple(&q, "b", 5);
        assert_eq!(q.pending_count(Platform::Twitch).unwrap(), 2);
        assert_eq!(q.pending_count(Platform::Kick).unwrap(), 0);
    }
}
