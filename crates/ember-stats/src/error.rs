use thiserror::Error;

/// Errors from the stats aggregator.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("session not found: {id}")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, StatsError>;
