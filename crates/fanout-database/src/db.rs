//! Database connection and query operations.

use crate::{
    ChangeRecord, DatabaseResult, DeadLetter, NewChangeEvent, NewDeadLetter, Notification,
    PoolConfig,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};
use std::path::Path;
use tracing::debug;

/// Database wrapper with query methods for every table the pipeline owns.
pub struct Database {
    pool: crate::DatabasePool,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path, config: PoolConfig) -> DatabaseResult<Self> {
        let pool = crate::DatabasePool::open(path, config)?;
        Ok(Self { pool })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let pool = crate::DatabasePool::open_in_memory()?;
        Ok(Self { pool })
    }

    /// Get the underlying pool (health checks, stats).
    pub fn pool(&self) -> &crate::DatabasePool {
        &self.pool
    }

    // ==========================================
    // Outbox change log
    // ==========================================

    /// Append a change event to the outbox log.
    ///
    /// The allocated sequence_id is monotonic; insertion order is log order.
    pub fn append_outbox_event(&self, event: &NewChangeEvent) -> DatabaseResult<ChangeRecord> {
        let conn = self.pool.get()?;
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO outbox_events (aggregate_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.aggregate_id,
                event.event_type,
                event.payload,
                created_at.to_rfc3339(),
            ],
        )?;

        let sequence_id = conn.last_insert_rowid();
        debug!(sequence_id, aggregate_id = %event.aggregate_id, "Appended outbox event");

        Ok(ChangeRecord {
            sequence_id,
            aggregate_id: event.aggregate_id.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            created_at,
        })
    }

    /// Read up to `limit` records strictly after the given sequence_id,
    /// ordered ascending. This is the reader's poll query.
    pub fn events_after(&self, after: i64, limit: usize) -> DatabaseResult<Vec<ChangeRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT sequence_id, aggregate_id, event_type, payload, created_at
             FROM outbox_events
             WHERE sequence_id > ?1
             ORDER BY sequence_id ASC
             LIMIT ?2",
        )?;

        let records = stmt
            .query_map(params![after, limit as i64], map_change_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Number of log records not yet past the cursor.
    pub fn outbox_backlog(&self) -> DatabaseResult<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM outbox_events
             WHERE sequence_id > (SELECT last_sequence_id FROM relay_cursor WHERE id = 1)",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==========================================
    // Relay cursor
    // ==========================================

    /// Last acknowledged log position.
    pub fn cursor(&self) -> DatabaseResult<i64> {
        let conn = self.pool.get()?;
        let cursor = conn.query_row(
            "SELECT last_sequence_id FROM relay_cursor WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(cursor)
    }

    /// Advance the cursor to the given position.
    ///
    /// Returns false (and leaves the cursor untouched) if the position is
    /// not ahead of the current value; the cursor never moves backwards.
    pub fn advance_cursor(&self, sequence_id: i64) -> DatabaseResult<bool> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE relay_cursor
             SET last_sequence_id = ?1, updated_at = ?2
             WHERE id = 1 AND last_sequence_id < ?1",
            params![sequence_id, Utc::now().to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    // ==========================================
    // Dead letters
    // ==========================================

    /// Park a record with full context for operator intervention.
    pub fn park_dead_letter(&self, letter: &NewDeadLetter) -> DatabaseResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO dead_letters
                 (sequence_id, aggregate_id, event_type, payload, error, attempts, parked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                letter.sequence_id,
                letter.aggregate_id,
                letter.event_type,
                letter.payload,
                letter.error,
                letter.attempts,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List parked records, oldest first.
    pub fn list_dead_letters(&self) -> DatabaseResult<Vec<DeadLetter>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, sequence_id, aggregate_id, event_type, payload, error, attempts, parked_at
             FROM dead_letters
             ORDER BY id ASC",
        )?;

        let letters = stmt
            .query_map([], |row| {
                Ok(DeadLetter {
                    id: row.get(0)?,
                    sequence_id: row.get(1)?,
                    aggregate_id: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                    error: row.get(5)?,
                    attempts: row.get(6)?,
                    parked_at: parse_datetime(row.get::<_, String>(7)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(letters)
    }

    /// Number of parked records.
    pub fn dead_letter_count(&self) -> DatabaseResult<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(count)
    }

    // ==========================================
    // Dedup + notifications
    // ==========================================

    /// Record a message id and persist its notification in ONE transaction.
    ///
    /// Returns None if the message id was already seen (idempotent no-op).
    /// The single transaction is what makes the pipeline exactly-once on the
    /// consumer side: there is no window where the dedup entry exists but the
    /// notification does not.
    pub fn insert_notification_if_new(
        &self,
        message_id: &str,
        user_id: &str,
        body: &str,
    ) -> DatabaseResult<Option<Notification>> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = Utc::now();

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO dedup_entries (message_id, seen_at) VALUES (?1, ?2)",
            params![message_id, now.to_rfc3339()],
        )?;

        if inserted == 0 {
            // Already seen; nothing to persist
            tx.rollback()?;
            return Ok(None);
        }

        tx.execute(
            "INSERT INTO notifications (id, user_id, body, created_at, delivered)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![message_id, user_id, body, now.to_rfc3339()],
        )?;

        tx.commit()?;

        Ok(Some(Notification {
            id: message_id.to_string(),
            user_id: user_id.to_string(),
            body: body.to_string(),
            created_at: now,
            delivered: false,
            delivered_at: None,
        }))
    }

    /// Undelivered notifications for a user, oldest first (replay order).
    pub fn undelivered_notifications(&self, user_id: &str) -> DatabaseResult<Vec<Notification>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, body, created_at, delivered, delivered_at
             FROM notifications
             WHERE user_id = ?1 AND delivered = 0
             ORDER BY rowid ASC",
        )?;

        let notifications = stmt
            .query_map(params![user_id], map_notification)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(notifications)
    }

    /// Mark a notification delivered. Returns false if it was already
    /// delivered or does not exist.
    pub fn mark_notification_delivered(&self, id: &str) -> DatabaseResult<bool> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE notifications
             SET delivered = 1, delivered_at = ?2
             WHERE id = ?1 AND delivered = 0",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    /// Total undelivered notifications across all users.
    pub fn undelivered_count(&self) -> DatabaseResult<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE delivered = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete dedup entries older than the retention window.
    ///
    /// Returns the number of entries removed.
    pub fn purge_dedup_entries(&self, retention: Duration) -> DatabaseResult<usize> {
        let conn = self.pool.get()?;
        let cutoff = (Utc::now() - retention).to_rfc3339();
        let removed = conn.execute(
            "DELETE FROM dedup_entries WHERE seen_at < ?1",
            params![cutoff],
        )?;
        if removed > 0 {
            debug!(removed, "Purged expired dedup entries");
        }
        Ok(removed)
    }

    /// Number of live dedup entries.
    pub fn dedup_count(&self) -> DatabaseResult<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row("SELECT COUNT(*) FROM dedup_entries", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn map_change_record(row: &Row<'_>) -> rusqlite::Result<ChangeRecord> {
    Ok(ChangeRecord {
        sequence_id: row.get(0)?,
        aggregate_id: row.get(1)?,
        event_type: row.get(2)?,
        payload: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn map_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        body: row.get(2)?,
        created_at: parse_datetime(row.get::<_, String>(3)?),
        delivered: row.get(4)?,
        delivered_at: row
            .get::<_, Option<String>>(5)?
            .map(parse_datetime),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
