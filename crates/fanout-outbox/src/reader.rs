//! Cursor-resuming reader over the outbox change log.

use crate::OutboxResult;
use fanout_database::{ChangeRecord, Database};
use std::sync::Arc;
use tracing::trace;

/// Reads the append-only log strictly after the durable cursor.
///
/// The reader has no side effects: it never advances the cursor. The relay
/// advances it only once the publisher has acknowledged a record, so a crash
/// between poll and acknowledgment re-reads the same records (at-least-once,
/// never lost).
pub struct OutboxReader {
    db: Arc<Database>,
    batch_size: usize,
}

impl OutboxReader {
    /// Create a new reader.
    pub fn new(db: Arc<Database>, batch_size: usize) -> Self {
        Self { db, batch_size }
    }

    /// One poll cycle: records after the cursor, ordered by sequence_id
    /// ascending, bounded by the batch size.
    pub fn poll(&self) -> OutboxResult<Vec<ChangeRecord>> {
        let cursor = self.db.cursor()?;
        let records = self.db.events_after(cursor, self.batch_size)?;
        trace!(cursor, fetched = records.len(), "Polled outbox log");
        Ok(records)
    }
}
