//! Bus message type.

use serde::{Deserialize, Serialize};

/// A message on the bus. Immutable.
///
/// `message_id` is derived deterministically by the producer from the source
/// record (aggregate id + log sequence), so redelivery after a crash carries
/// the same id and consumers can deduplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Deterministic, globally unique id for dedup.
    pub message_id: String,
    /// Partition key; messages with the same key are consumed in order.
    pub key: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Create a new bus message.
    pub fn new(message_id: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            key: key.into(),
            payload,
        }
    }
}
