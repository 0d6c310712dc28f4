//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the append-only change log. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Monotonic, unique log position.
    pub sequence_id: i64,
    /// Aggregate the change belongs to; also the bus partition key.
    pub aggregate_id: String,
    /// Domain event name (e.g. "order.shipped").
    pub event_type: String,
    /// Opaque payload bytes (JSON envelope in this pipeline).
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Deterministic bus message id for this record.
    ///
    /// Derived from aggregate and sequence so a republish after a crash
    /// produces the same id and the consumer can deduplicate.
    pub fn message_id(&self) -> String {
        format!("{}:{}", self.aggregate_id, self.sequence_id)
    }
}

/// A change event to append to the outbox log.
#[derive(Debug, Clone)]
pub struct NewChangeEvent {
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
}

/// A persisted notification. Append-only history; `delivered` flips once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Equals the originating bus message id.
    pub id: String,
    pub user_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// A record parked after exhausting publish retries or failing fatally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub sequence_id: i64,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub error: String,
    pub attempts: u32,
    pub parked_at: DateTime<Utc>,
}

/// A dead letter to park.
#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub sequence_id: i64,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub error: String,
    pub attempts: u32,
}

impl NewDeadLetter {
    /// Park context for a change record that could not be published.
    pub fn from_record(record: &ChangeRecord, error: &str, attempts: u32) -> Self {
        Self {
            sequence_id: record.sequence_id,
            aggregate_id: record.aggregate_id.clone(),
            event_type: record.event_type.clone(),
            payload: record.payload.clone(),
            error: error.to_string(),
            attempts,
        }
    }
}
