//! Push layer error types.

use thiserror::Error;

/// Push layer error type.
#[derive(Error, Debug)]
pub enum PushError {
    /// IO error on the socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] fanout_database::DatabaseError),

    /// Protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using PushError.
pub type PushResult<T> = Result<T, PushError>;
