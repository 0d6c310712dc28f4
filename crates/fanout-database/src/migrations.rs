//! Database migrations.
//!
//! This module contains all SQL migrations for the database schema.
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    // Create migrations tracking table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(
        current_version,
        target_version = CURRENT_VERSION,
        "Running migrations"
    );

    if current_version < 1 {
        migrate_v1_outbox_log(conn)?;
    }
    if current_version < 2 {
        migrate_v2_notifications(conn)?;
    }
    if current_version < 3 {
        migrate_v3_dead_letters(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: Outbox change log and relay cursor.
fn migrate_v1_outbox_log(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: outbox log");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox_events (
            sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
            aggregate_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload BLOB NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_events_aggregate
            ON outbox_events(aggregate_id);

        CREATE TABLE IF NOT EXISTS relay_cursor (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_sequence_id INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT
        );

        INSERT OR IGNORE INTO relay_cursor (id, last_sequence_id) VALUES (1, 0);
        ",
    )?;

    record_migration(conn, 1, "outbox_log")?;
    Ok(())
}

/// V2: Notifications and the dedup store.
fn migrate_v2_notifications(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: notifications");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS dedup_entries (
            message_id TEXT PRIMARY KEY,
            seen_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_dedup_entries_seen_at
            ON dedup_entries(seen_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            delivered INTEGER NOT NULL DEFAULT 0,
            delivered_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user_delivered
            ON notifications(user_id, delivered);
        ",
    )?;

    record_migration(conn, 2, "notifications")?;
    Ok(())
}

/// V3: Dead-letter area for records that exhausted publish retries.
fn migrate_v3_dead_letters(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v3: dead letters");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS dead_letters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sequence_id INTEGER NOT NULL,
            aggregate_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload BLOB NOT NULL,
            error TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            parked_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_dead_letters_parked_at
            ON dead_letters(parked_at);
        ",
    )?;

    record_migration(conn, 3, "dead_letters")?;
    Ok(())
}
