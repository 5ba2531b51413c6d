use std::sync::Mutex;

use rusqlite::Connection;

use crate::db::init_db;
use crate::error::Result;

/// Thread-safe handle over the tenant-configuration database.
///
/// Wraps a single SQLite connection in a `Mutex`, the same pattern every
/// other persistent subsystem uses. Method impls are grouped by domain in
/// sibling modules (`configs`, `connections`, `giveaways`, …).
pub struct Store {
    pub(crate) db: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }
}

/// Parse an optional RFC-3339 TEXT column into a UTC timestamp.
pub(crate) fn parse_ts(value: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    value
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}
