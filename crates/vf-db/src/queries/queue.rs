//! Durable, bounded task queue.
//!
//! Entries are claimed with an atomic `UPDATE ... RETURNING` and removed
//! only on ack, so a worker that dies mid-entry leaves a claim behind that
//! is redelivered once its lease expires.

use chrono::{Duration, Utc};
use rusqlite::Connection;
use vf_core::{CorrelationId, Error, JobId, JobKind, QueueEntryId, Result};

use crate::models::QueueEntry;
use crate::{now_rfc3339, timestamp};

const COLS: &str = "id, job_id, kind, source_path, scoped_id, category, correlation_id,
    attempts, locked_by, locked_at, enqueued_at";

/// Parameters for a new queue entry.
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub job_id: JobId,
    pub kind: JobKind,
    pub source_path: &'a str,
    pub scoped_id: &'a str,
    pub category: &'a str,
}

/// Append an entry, rejecting it with [`Error::Queue`] once the queue
/// holds `capacity` entries (waiting or claimed).
pub fn enqueue(conn: &Connection, entry: &NewEntry<'_>, capacity: u32) -> Result<QueueEntry> {
    let id = QueueEntryId::new();
    let correlation_id = CorrelationId::new();

    // The depth check and insert are a single statement, so two concurrent
    // producers cannot both squeeze past the limit.
    let q = format!(
        "INSERT INTO queue_entries
            (id, job_id, kind, source_path, scoped_id, category, correlation_id, enqueued_at)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
         WHERE (SELECT COUNT(*) FROM queue_entries) < ?9
         RETURNING {COLS}"
    );
    let result = conn.query_row(
        &q,
        rusqlite::params![
            id.to_string(),
            entry.job_id.to_string(),
            entry.kind.as_str(),
            entry.source_path,
            entry.scoped_id,
            entry.category,
            correlation_id.to_string(),
            now_rfc3339(),
            capacity as i64
        ],
        QueueEntry::from_row,
    );
    match result {
        Ok(e) => Ok(e),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(Error::Queue(format!(
            "queue full ({capacity} entries)"
        ))),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Claim the oldest entry that is unclaimed or whose lease has expired.
pub fn claim_next(conn: &Connection, worker: &str, lease: std::time::Duration) -> Result<Option<QueueEntry>> {
    let now = Utc::now();
    let lease = Duration::from_std(lease).unwrap_or_else(|_| Duration::days(365));
    let expired_before = timestamp(now - lease);

    let q = format!(
        "UPDATE queue_entries SET locked_by = ?1, locked_at = ?2, attempts = attempts + 1
         WHERE id = (
             SELECT id FROM queue_entries
             WHERE locked_at IS NULL OR locked_at < ?3
             ORDER BY enqueued_at ASC, rowid ASC LIMIT 1
         )
         RETURNING {COLS}"
    );

    let result = conn.query_row(
        &q,
        rusqlite::params![worker, timestamp(now), expired_before],
        QueueEntry::from_row,
    );
    match result {
        Ok(e) => {
            if e.attempts > 1 {
                tracing::warn!(
                    entry_id = %e.id,
                    job_id = %e.job_id,
                    attempts = e.attempts,
                    "Redelivering queue entry after expired lease"
                );
            }
            Ok(Some(e))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Remove a finished entry.
pub fn ack(conn: &Connection, id: QueueEntryId) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM queue_entries WHERE id = ?1", [id.to_string()])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Drop a claim so the entry is immediately claimable again.
pub fn release(conn: &Connection, id: QueueEntryId) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE queue_entries SET locked_by = NULL, locked_at = NULL WHERE id = ?1",
            [id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Drop every claim; used at startup, when no worker can own anything yet.
pub fn release_all_claims(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE queue_entries SET locked_by = NULL, locked_at = NULL
         WHERE locked_at IS NOT NULL",
        [],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Number of entries in the queue, claimed or not.
pub fn depth(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM queue_entries", [], |row| row.get(0))
        .map_err(|e| Error::database(e.to_string()))
}

/// Entries referring to a job, oldest first.
pub fn entries_for_job(conn: &Connection, job_id: JobId) -> Result<Vec<QueueEntry>> {
    let q = format!(
        "SELECT {COLS} FROM queue_entries WHERE job_id = ?1 ORDER BY enqueued_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([job_id.to_string()], QueueEntry::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use crate::queries::jobs;

    const LEASE: std::time::Duration = std::time::Duration::from_secs(90 * 60);

    fn entry(job_id: JobId) -> NewEntry<'static> {
        NewEntry {
            job_id,
            kind: JobKind::Convert,
            source_path: "/uploads/a.mp4",
            scoped_id: "0123456789abcdef",
            category: "PHY",
        }
    }

    #[test]
    fn enqueue_claim_ack() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = jobs::create_job(&conn, "a", "PHY", None).unwrap();

        let queued = enqueue(&conn, &entry(job.id), 100).unwrap();
        assert_eq!(queued.kind, JobKind::Convert);
        assert_eq!(queued.attempts, 0);
        assert_eq!(depth(&conn).unwrap(), 1);

        let claimed = claim_next(&conn, "worker-0", LEASE).unwrap().unwrap();
        assert_eq!(claimed.id, queued.id);
        assert_eq!(claimed.locked_by.as_deref(), Some("worker-0"));
        assert_eq!(claimed.attempts, 1);

        // claimed entries are not handed out twice while the lease holds
        assert!(claim_next(&conn, "worker-1", LEASE).unwrap().is_none());

        assert!(ack(&conn, claimed.id).unwrap());
        assert_eq!(depth(&conn).unwrap(), 0);
    }

    #[test]
    fn fifo_order() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let a = jobs::create_job(&conn, "a", "PHY", None).unwrap();
        let b = jobs::create_job(&conn, "b", "PHY", None).unwrap();
        enqueue(&conn, &entry(a.id), 100).unwrap();
        enqueue(&conn, &entry(b.id), 100).unwrap();

        assert_eq!(claim_next(&conn, "w", LEASE).unwrap().unwrap().job_id, a.id);
        assert_eq!(claim_next(&conn, "w", LEASE).unwrap().unwrap().job_id, b.id);
    }

    #[test]
    fn capacity_enforced() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = jobs::create_job(&conn, "a", "PHY", None).unwrap();
        enqueue(&conn, &entry(job.id), 2).unwrap();
        enqueue(&conn, &entry(job.id), 2).unwrap();

        let err = enqueue(&conn, &entry(job.id), 2).unwrap_err();
        assert!(matches!(err, Error::Queue(_)));
        assert_eq!(depth(&conn).unwrap(), 2);
    }

    #[test]
    fn expired_lease_is_redelivered() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = jobs::create_job(&conn, "a", "PHY", None).unwrap();
        enqueue(&conn, &entry(job.id), 100).unwrap();

        claim_next(&conn, "worker-0", LEASE).unwrap().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let again = claim_next(&conn, "worker-1", std::time::Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(again.locked_by.as_deref(), Some("worker-1"));
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn release_makes_entry_claimable() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = jobs::create_job(&conn, "a", "PHY", None).unwrap();
        enqueue(&conn, &entry(job.id), 100).unwrap();
        enqueue(&conn, &entry(job.id), 100).unwrap();

        let first = claim_next(&conn, "w", LEASE).unwrap().unwrap();
        claim_next(&conn, "w", LEASE).unwrap().unwrap();
        assert!(release(&conn, first.id).unwrap());
        assert_eq!(claim_next(&conn, "w", LEASE).unwrap().unwrap().id, first.id);

        assert_eq!(release_all_claims(&conn).unwrap(), 2);
        assert!(claim_next(&conn, "w", LEASE).unwrap().is_some());
    }

    #[test]
    fn correlation_id_survives_redelivery() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = jobs::create_job(&conn, "a", "PHY", None).unwrap();
        let queued = enqueue(&conn, &entry(job.id), 100).unwrap();

        let stored: String = conn
            .query_row(
                "SELECT correlation_id FROM queue_entries WHERE id = ?1",
                [queued.id.to_string()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stored.parse::<CorrelationId>().unwrap(), queued.correlation_id);

        let first = claim_next(&conn, "w", LEASE).unwrap().unwrap();
        release(&conn, first.id).unwrap();
        let again = claim_next(&conn, "w", LEASE).unwrap().unwrap();
        assert_eq!(again.correlation_id, queued.correlation_id);
        assert_ne!(again.correlation_id.as_uuid(), queued.id.as_uuid());
    }

    #[test]
    fn malformed_correlation_id_is_a_database_error() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = jobs::create_job(&conn, "a", "PHY", None).unwrap();
        enqueue(&conn, &entry(job.id), 100).unwrap();
        conn.execute("UPDATE queue_entries SET correlation_id = 'not-a-uuid'", [])
            .unwrap();

        let err = entries_for_job(&conn, job.id).unwrap_err();
        assert!(matches!(err, Error::Database { .. }));
    }

    #[test]
    fn entries_cascade_with_job() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = jobs::create_job(&conn, "a", "PHY", None).unwrap();
        enqueue(&conn, &entry(job.id), 100).unwrap();
        assert_eq!(entries_for_job(&conn, job.id).unwrap().len(), 1);

        jobs::delete_job(&conn, job.id).unwrap();
        assert_eq!(depth(&conn).unwrap(), 0);
    }
}
