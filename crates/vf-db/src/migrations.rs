//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use vf_core::{Error, Result};

/// V1: job state store.
const V1_JOBS: &str = r#"
CREATE TABLE jobs (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    category      TEXT NOT NULL,
    scoped_id     TEXT UNIQUE,
    source_path   TEXT,
    artifact_path TEXT,
    storage_tier  TEXT NOT NULL DEFAULT 'local',
    status        TEXT NOT NULL DEFAULT 'pending',
    progress      INTEGER NOT NULL DEFAULT 0,
    error         TEXT,
    failed_stage  TEXT,
    drm_video_id  TEXT,
    version       INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE INDEX idx_jobs_status ON jobs(status);
"#;

/// V2: durable task queue.
const V2_QUEUE: &str = r#"
CREATE TABLE queue_entries (
    id             TEXT PRIMARY KEY,
    job_id         TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    kind           TEXT NOT NULL,
    source_path    TEXT NOT NULL,
    scoped_id      TEXT NOT NULL,
    category       TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    attempts       INTEGER NOT NULL DEFAULT 0,
    locked_by      TEXT,
    locked_at      TEXT,
    enqueued_at    TEXT NOT NULL
);
CREATE INDEX idx_queue_entries_job ON queue_entries(job_id);
CREATE INDEX idx_queue_entries_claim ON queue_entries(locked_at, enqueued_at);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_JOBS), (2, V2_QUEUE)];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        tracing::debug!(version, "Applied database migration");
    }

    Ok(())
}
