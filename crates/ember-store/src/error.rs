use thiserror::Error;

/// Errors from the persistence port.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write violated an entity contract (e.g. random interval bounds).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A uniqueness contract blocked the write (duplicate entry, second
    /// active giveaway, …).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A JSON column failed to round-trip.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
