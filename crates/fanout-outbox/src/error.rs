//! Outbox relay error types.

use thiserror::Error;

/// Outbox relay error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] fanout_database::DatabaseError),

    /// Bus error
    #[error("Bus error: {0}")]
    Bus(#[from] fanout_bus::BusError),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
