//! Consumer error types.

use thiserror::Error;

/// Consumer error type.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] fanout_database::DatabaseError),

    /// Bus error
    #[error("Bus error: {0}")]
    Bus(#[from] fanout_bus::BusError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using ConsumerError.
pub type ConsumerResult<T> = Result<T, ConsumerError>;
