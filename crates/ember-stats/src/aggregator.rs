use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use ember_core::types::{Platform, TenantId};

use crate::db::init_db;
use crate::error::{Result, StatsError};
use crate::types::{SessionStats, StreamSession, ViewerSnapshot};

/// Session lifecycle and chat metrics.
///
/// Everything is append-only except the projected columns on the session
/// row (peak_viewers, total_messages, unique_chatters).
pub struct StatsAggregator {
    db: Mutex<Connection>,
}

impl StatsAggregator {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
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

    /// Open a session for (tenant, platform). Any session still open for the
    /// pair is ended first, so at most one is ever open.
    pub fn create_session(&self, tenant: &TenantId, platform: Platform) -> Result<StreamSession> {
        let now = Utc::now();
        let id = Uuid::now_v7().to_string();
        let db = self.db.lock().unwrap();

        let stale = db.execute(
            "UPDATE stream_sessions SET ended_at = ?1
             WHERE tenant_id = ?2 AND platform = ?3 AND ended_at IS NULL",
            rusqlite::params![now.to_rfc3339(), tenant.as_str(), platform.as_str()],
        )?;
        if stale > 0 {
            debug!(tenant = %tenant, platform = %platform, "closed stale open session");
        }

        db.execute(
            "INSERT INTO stream_sessions (id, tenant_id, platform, started_at)
             VALUES (?1,?2,?3,?4)",
            rusqlite::params![id, tenant.as_str(), platform.as_str(), now.to_rfc3339()],
        )?;
        info!(tenant = %tenant, platform = %platform, session = %id, "stream session opened");
        Ok(StreamSession {
            id,
            tenant_id: tenant.clone(),
            platform,
            started_at: now,
            ended_at: None,
            peak_viewers: 0,
            total_messages: 0,
            unique_chatters: 0,
        })
    }

    /// End a session. Idempotent — ending an ended session changes nothing.
    pub fn end_session(&self, session_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE stream_sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
            rusqlite::params![Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    /// The open session for (tenant, platform), if any.
    pub fn open_session(
        &self,
        tenant: &TenantId,
        platform: Platform,
    ) -> Result<Option<StreamSession>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, started_at, peak_viewers, total_messages, unique_chatters
             FROM stream_sessions
             WHERE tenant_id = ?1 AND platform = ?2 AND ended_at IS NULL",
            rusqlite::params![tenant.as_str(), platform.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, u64>(3)?,
                    row.get::<_, u64>(4)?,
                ))
            },
        ) {
            Ok((id, started, peak, total, unique)) => Ok(Some(StreamSession {
                id,
                tenant_id: tenant.clone(),
                platform,
                started_at: chrono::DateTime::parse_from_rfc3339(&started)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                ended_at: None,
                peak_viewers: peak,
                total_messages: total,
                unique_chatters: unique,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StatsError::Database(e)),
        }
    }

    /// Append a viewer snapshot and bump the session peak when exceeded.
    pub fn track_viewer_count(&self, session_id: &str, viewer_count: u32) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO viewer_snapshots (session_id, viewer_count, timestamp)
             VALUES (?1,?2,?3)",
            rusqlite::params![session_id, viewer_count, Utc::now().to_rfc3339()],
        )?;
        let changed = db.execute(
            "UPDATE stream_sessions SET peak_viewers = ?1
             WHERE id = ?2 AND peak_viewers < ?1",
            rusqlite::params![viewer_count, session_id],
        )?;
        if changed > 0 {
            debug!(session = %session_id, peak = viewer_count, "new peak viewers");
        }
        Ok(())
    }

    /// Append one chat_activity row and refresh the session projections.
    pub fn track_chat_message(&self, session_id: &str, username: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chat_activity (session_id, username, timestamp) VALUES (?1,?2,?3)",
            rusqlite::params![session_id, username.to_lowercase(), Utc::now().to_rfc3339()],
        )?;
        db.execute(
            "UPDATE stream_sessions SET
               total_messages = (SELECT COUNT(*) FROM chat_activity WHERE session_id = ?1),
               unique_chatters = (SELECT COUNT(DISTINCT username) FROM chat_activity WHERE session_id = ?1)
             WHERE id = ?1",
            rusqlite::params![session_id],
        )?;
        Ok(())
    }

    pub fn snapshots(&self, session_id: &str) -> Result<Vec<ViewerSnapshot>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT viewer_count, timestamp FROM viewer_snapshots
             WHERE session_id = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(count, ts)| {
                Some(ViewerSnapshot {
                    session_id: session_id.to_string(),
                    viewer_count: count,
                    timestamp: chrono::DateTime::parse_from_rfc3339(&ts)
                        .ok()?
                        .with_timezone(&Utc),
                })
            })
            .collect())
    }

    /// Roll-up across a tenant's open sessions for the status endpoint.
    pub fn tenant_stats(&self, tenant: &TenantId) -> Result<SessionStats> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(total_messages), 0),
                    COALESCE(SUM(unique_chatters), 0), COALESCE(MAX(peak_viewers), 0)
             FROM stream_sessions WHERE tenant_id = ?1 AND ended_at IS NULL",
            rusqlite::params![tenant.as_str()],
            |row| {
                Ok(SessionStats {
                    active_sessions: row.get(0)?,
                    total_messages: row.get(1)?,
                    unique_chatters: row.get(2)?,
                    peak_viewers: row.get(3)?,
                })
            },
        )
        .map_err(StatsError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_one_open_session_per_pair() {
        let stats = StatsAggregator::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let first = stats.create_session(&tenant, Platform::Twitch).unwrap();
        let second = stats.create_session(&tenant, Platform::Twitch).unwrap();

        let open = stats.open_session(&tenant, Platform::Twitch).unwrap().unwrap();
        assert_eq!(open.id, second.id);
        assert_ne!(first.id, second.id);

        // the other platform has its own slot
        stats.create_session(&tenant, Platform::Kick).unwrap();
        assert!(stats.open_session(&tenant, Platform::Kick).unwrap().is_some());
    }

    #[test]
    fn end_session_is_idempotent() {
        let stats = StatsAggregator::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let session = stats.create_session(&tenant, Platform::Twitch).unwrap();
        stats.end_session(&session.id).unwrap();
        stats.end_session(&session.id).unwrap();
        assert!(stats.open_session(&tenant, Platform::Twitch).unwrap().is_none());
    }

    #[test]
    fn peak_viewers_only_goes_up() {
        let stats = StatsAggregator::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let session = stats.create_session(&tenant, Platform::Twitch).unwrap();

        stats.track_viewer_count(&session.id, 50).unwrap();
        stats.track_viewer_count(&session.id, 120).unwrap();
        stats.track_viewer_count(&session.id, 80).unwrap();

        let open = stats.open_session(&tenant, Platform::Twitch).unwrap().unwrap();
        assert_eq!(open.peak_viewers, 120);
        assert_eq!(stats.snapshots(&session.id).unwrap().len(), 3);
    }

    #[test]
    fn chat_projections_count_messages_and_distinct_chatters() {
        let stats = StatsAggregator::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let session = stats.create_session(&tenant, Platform::Twitch).unwrap();

        stats.track_chat_message(&session.id, "alice").unwrap();
        stats.track_chat_message(&session.id, "ALICE").unwrap();
        stats.track_chat_message(&session.id, "bob").unwrap();

        let open = stats.open_session(&tenant, Platform::Twitch).unwrap().unwrap();
        assert_eq!(open.total_messages, 3);
        assert_eq!(open.unique_chatters, 2);
    }

    #[test]
    fn tenant_stats_roll_up() {
        let stats = StatsAggregator::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let s1 = stats.create_session(&tenant, Platform::Twitch).unwrap();
        let s2 = stats.create_session(&tenant, Platform::Kick).unwrap();
        stats.track_chat_message(&s1.id, "alice").unwrap();
        stats.track_chat_message(&s2.id, "bob").unwrap();
        stats.track_viewer_count(&s1.id, 42).unwrap();

        let rollup = stats.tenant_stats(&tenant).unwrap();
        assert_eq!(rollup.active_sessions, 2);
        assert_eq!(rollup.total_messages, 2);
        assert_eq!(rollup.peak_viewers, 42);
    }
}
