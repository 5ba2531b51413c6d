use rusqlite::Connection;

use crate::error::Result;

/// Initialise the session tables and the contractual indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS stream_sessions (
            id             TEXT PRIMARY KEY,
            tenant_id      TEXT NOT NULL,
            platform       TEXT NOT NULL,
            started_at     TEXT NOT NULL,
            ended_at       TEXT,
            peak_viewers   INTEGER NOT NULL DEFAULT 0,
            total_messages INTEGER NOT NULL DEFAULT 0,
            unique_chatters INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_open
            ON stream_sessions(tenant_id, platform) WHERE ended_at IS NULL;

        CREATE TABLE IF NOT EXISTS viewer_snapshots (
            session_id   TEXT NOT NULL,
            viewer_count INTEGER NOT NULL,
            timestamp    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_session
            ON viewer_snapshots(session_id, timestamp);

        CREATE TABLE IF NOT EXISTS chat_activity (
            session_id TEXT NOT NULL,
            username   TEXT NOT NULL,
            timestamp  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activity_session
            ON chat_activity(session_id, timestamp);",
    )?;
    Ok(())
}
