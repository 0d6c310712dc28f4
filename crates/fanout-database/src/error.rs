//! Database error types.

use thiserror::Error;

/// Database error type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Underlying SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error
    #[error("Connection error: {0}")]
    Connection(String),

    /// IO error (directory creation, file access)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found where one was required
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias using DatabaseError.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
