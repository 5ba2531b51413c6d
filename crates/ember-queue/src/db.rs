use rusqlite::Connection;

use crate::error::Result;

/// Initialise the message queue table and its claim index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS message_queue (
            id            TEXT PRIMARY KEY,
            tenant_id     TEXT NOT NULL,
            platform      TEXT NOT NULL,
            message_type  TEXT NOT NULL,
            content       TEXT NOT NULL,
            metadata      TEXT NOT NULL DEFAULT '{}',
            status        TEXT NOT NULL DEFAULT 'pending',
            priority      INTEGER NOT NULL DEFAULT 5,
            scheduled_for TEXT NOT NULL,
            retry_count   INTEGER NOT NULL DEFAULT 0,
            max_retries   INTEGER NOT NULL DEFAULT 3,
            last_error    TEXT,
            processed_at  TEXT,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queue_claim
            ON message_queue(platform, status, scheduled_for);",
    )?;
    Ok(())
}
