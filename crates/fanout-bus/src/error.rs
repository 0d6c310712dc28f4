//! Bus error types.

use thiserror::Error;

/// Bus error type.
#[derive(Error, Debug)]
pub enum BusError {
    /// Publish failed (transient broker condition)
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Subscription or channel closed
    #[error("Closed: {0}")]
    Closed(String),

    /// Subscriber rejected a message
    #[error("Subscriber error: {0}")]
    Subscriber(String),
}

/// Result type alias using BusError.
pub type BusResult<T> = Result<T, BusError>;
