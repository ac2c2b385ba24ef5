//! Job state store.
//!
//! Every status write goes through [`set_status`], which enforces the
//! transition graph of [`JobStatus::can_transition`], applies the saturation
//! rule ([`JobStatus::resolve`]) and ignores progress regressions within the
//! same status. Each accepted write bumps `version`.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use vf_core::job::{new_scoped_id, PROGRESS_SATURATED};
use vf_core::{Error, JobId, JobKind, JobStatus, Result, StorageTier};

use crate::models::Job;
use crate::now_rfc3339;

const COLS: &str = "id, name, category, scoped_id, source_path, artifact_path,
    storage_tier, status, progress, error, failed_stage, drm_video_id, version,
    created_at, updated_at";

fn write_tx(conn: &Connection) -> Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| Error::database(e.to_string()))
}

/// Create a new `pending` job with a freshly generated scoped id.
pub fn create_job(
    conn: &Connection,
    name: &str,
    category: &str,
    source_path: Option<&str>,
) -> Result<Job> {
    let id = JobId::new();
    let scoped_id = new_scoped_id();
    let now = now_rfc3339();

    let q = format!(
        "INSERT INTO jobs (id, name, category, scoped_id, source_path, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)
         RETURNING {COLS}"
    );
    conn.query_row(
        &q,
        rusqlite::params![id.to_string(), name, category, scoped_id, source_path, now],
        Job::from_row,
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], Job::from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get a job by ID, failing with [`Error::NotFound`] if it does not exist.
pub fn require_job(conn: &Connection, id: JobId) -> Result<Job> {
    get_job(conn, id)?.ok_or_else(|| Error::not_found("job", id))
}

/// Look a job up by its scoped id.
pub fn find_by_scoped_id(conn: &Connection, scoped_id: &str) -> Result<Option<Job>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE scoped_id = ?1");
    let result = conn.query_row(&q, [scoped_id], Job::from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

fn query_jobs(conn: &Connection, q: &str, params: &[&dyn rusqlite::types::ToSql]) -> Result<Vec<Job>> {
    let mut stmt = conn.prepare(q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(params, Job::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// List jobs with optional status filter and pagination, oldest first.
pub fn list_jobs(
    conn: &Connection,
    status: Option<JobStatus>,
    offset: i64,
    limit: i64,
) -> Result<Vec<Job>> {
    match status {
        Some(s) => query_jobs(
            conn,
            &format!(
                "SELECT {COLS} FROM jobs WHERE status = ?1
                 ORDER BY created_at ASC LIMIT ?2 OFFSET ?3"
            ),
            rusqlite::params![s.as_str(), limit, offset],
        ),
        None => query_jobs(
            conn,
            &format!("SELECT {COLS} FROM jobs ORDER BY created_at ASC LIMIT ?1 OFFSET ?2"),
            rusqlite::params![limit, offset],
        ),
    }
}

/// Completed jobs whose artifacts are still on the local tier.
pub fn list_completed_local(conn: &Connection) -> Result<Vec<Job>> {
    query_jobs(
        conn,
        &format!(
            "SELECT {COLS} FROM jobs WHERE status = 'completed' AND storage_tier = 'local'
             ORDER BY created_at ASC"
        ),
        &[],
    )
}

/// Running jobs not touched since `cutoff` that no queue entry refers to.
pub fn list_stale(conn: &Connection, cutoff: &str) -> Result<Vec<Job>> {
    query_jobs(
        conn,
        &format!(
            "SELECT {COLS} FROM jobs j
             WHERE status IN ('processing', 'archiving') AND updated_at < ?1
               AND NOT EXISTS (SELECT 1 FROM queue_entries q WHERE q.job_id = j.id)
             ORDER BY created_at ASC"
        ),
        rusqlite::params![cutoff],
    )
}

/// Write a status/progress update, enforcing the state machine.
///
/// - `processing` at 100% is stored as `completed` (saturation rule).
/// - A transition outside the graph fails with [`Error::InvalidTransition`].
/// - A same-status write that would lower progress is ignored and the
///   current record is returned unchanged.
/// - Entering `failed` records which stage failed.
pub fn set_status(
    conn: &Connection,
    id: JobId,
    status: JobStatus,
    progress: u8,
    error: Option<&str>,
) -> Result<Job> {
    let tx = write_tx(conn)?;
    let current = require_job(&tx, id)?;

    let progress = progress.min(PROGRESS_SATURATED);
    let target = status.resolve(progress);

    if !current.status.can_transition(target, false) {
        return Err(Error::InvalidTransition {
            from: current.status,
            to: target,
        });
    }

    if target == current.status && progress < current.progress {
        tracing::debug!(
            job_id = %id,
            status = %target,
            stored = current.progress,
            requested = progress,
            "Ignoring progress regression"
        );
        return Ok(current);
    }

    let failed_stage = if target == JobStatus::Failed {
        Some(match current.status {
            JobStatus::Archiving => JobKind::Migrate,
            _ => JobKind::Convert,
        })
    } else {
        current.failed_stage
    };

    let q = format!(
        "UPDATE jobs SET status = ?1, progress = ?2, error = ?3, failed_stage = ?4,
            version = version + 1, updated_at = ?5
         WHERE id = ?6
         RETURNING {COLS}"
    );
    let job = tx
        .query_row(
            &q,
            rusqlite::params![
                target.as_str(),
                progress as i64,
                error,
                failed_stage.map(JobKind::as_str),
                now_rfc3339(),
                id.to_string()
            ],
            Job::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(job)
}

/// Point the job at its artifact manifest on the given tier.
pub fn set_artifact_location(
    conn: &Connection,
    id: JobId,
    path: &str,
    tier: StorageTier,
) -> Result<Job> {
    let q = format!(
        "UPDATE jobs SET artifact_path = ?1, storage_tier = ?2, version = version + 1,
            updated_at = ?3
         WHERE id = ?4
         RETURNING {COLS}"
    );
    let result = conn.query_row(
        &q,
        rusqlite::params![path, tier.as_str(), now_rfc3339(), id.to_string()],
        Job::from_row,
    );
    match result {
        Ok(j) => Ok(j),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(Error::not_found("job", id)),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Atomically finish a migration: `archiving -> completed` on the remote
/// tier with the pointer rewritten to `remote_key`.
pub fn finish_migration(conn: &Connection, id: JobId, remote_key: &str) -> Result<Job> {
    let tx = write_tx(conn)?;
    let current = require_job(&tx, id)?;
    if current.status != JobStatus::Archiving {
        return Err(Error::InvalidTransition {
            from: current.status,
            to: JobStatus::Completed,
        });
    }

    let q = format!(
        "UPDATE jobs SET status = 'completed', progress = 100, error = NULL,
            artifact_path = ?1, storage_tier = 'remote', version = version + 1,
            updated_at = ?2
         WHERE id = ?3
         RETURNING {COLS}"
    );
    let job = tx
        .query_row(
            &q,
            rusqlite::params![remote_key, now_rfc3339(), id.to_string()],
            Job::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(job)
}

/// Update the recorded source path.
pub fn set_source_path(conn: &Connection, id: JobId, source_path: Option<&str>) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE jobs SET source_path = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![source_path, now_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Record the external DRM-hosted video id.
pub fn set_drm_video_id(conn: &Connection, id: JobId, drm_video_id: Option<&str>) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE jobs SET drm_video_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![drm_video_id, now_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Operator retry: move a `failed` job back to `pending`.
///
/// `source_path`, when given, replaces the recorded source (the caller
/// relocated it). `failed_stage` is kept so the caller knows which stage
/// to re-enqueue.
pub fn retry_job(conn: &Connection, id: JobId, source_path: Option<&str>) -> Result<Job> {
    let tx = write_tx(conn)?;
    let current = require_job(&tx, id)?;
    if !current.status.can_transition(JobStatus::Pending, true) {
        return Err(Error::InvalidTransition {
            from: current.status,
            to: JobStatus::Pending,
        });
    }

    let q = format!(
        "UPDATE jobs SET status = 'pending', progress = 0, error = NULL,
            source_path = COALESCE(?1, source_path), version = version + 1,
            updated_at = ?2
         WHERE id = ?3
         RETURNING {COLS}"
    );
    let job = tx
        .query_row(
            &q,
            rusqlite::params![source_path, now_rfc3339(), id.to_string()],
            Job::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(job)
}

/// Delete a job row (queue entries cascade).
pub fn delete_job(conn: &Connection, id: JobId) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM jobs WHERE id = ?1", [id.to_string()])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use vf_core::job::is_scoped_id;

    fn setup() -> (crate::pool::DbPool, Job) {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, "Lecture 1", "PHY", Some("/uploads/lecture.mp4")).unwrap();
        drop(conn);
        (pool, job)
    }

    #[test]
    fn create_and_get() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.storage_tier, StorageTier::Local);
        assert_eq!(job.version, 0);
        assert!(is_scoped_id(job.scoped_id.as_deref().unwrap()));

        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(found.source_path.as_deref(), Some("/uploads/lecture.mp4"));
        assert_eq!(found.category, "PHY");
    }

    #[test]
    fn require_missing_is_not_found() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let err = require_job(&conn, JobId::new()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn conversion_lifecycle() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();

        let j = set_status(&conn, job.id, JobStatus::Processing, 0, None).unwrap();
        assert_eq!(j.status, JobStatus::Processing);
        let j = set_status(&conn, job.id, JobStatus::Processing, 45, None).unwrap();
        assert_eq!(j.progress, 45);
        let j = set_status(&conn, job.id, JobStatus::Completed, 100, None).unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.version, 3);
    }

    #[test]
    fn processing_at_100_saturates_to_completed() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        set_status(&conn, job.id, JobStatus::Processing, 10, None).unwrap();
        let j = set_status(&conn, job.id, JobStatus::Processing, 100, None).unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.progress, 100);
    }

    #[test]
    fn invalid_transition_rejected() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        let err = set_status(&conn, job.id, JobStatus::Completed, 100, None).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed
            }
        ));
        // nothing was written
        let j = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.version, 0);
    }

    #[test]
    fn failed_is_terminal_without_retry() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        set_status(&conn, job.id, JobStatus::Processing, 0, None).unwrap();
        let j = set_status(&conn, job.id, JobStatus::Failed, 0, Some("exit status 1")).unwrap();
        assert_eq!(j.error.as_deref(), Some("exit status 1"));
        assert_eq!(j.failed_stage, Some(JobKind::Convert));

        for next in [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed] {
            assert!(set_status(&conn, job.id, next, 0, None).is_err());
        }
    }

    #[test]
    fn progress_regression_ignored() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        set_status(&conn, job.id, JobStatus::Processing, 0, None).unwrap();
        let before = set_status(&conn, job.id, JobStatus::Processing, 60, None).unwrap();
        let after = set_status(&conn, job.id, JobStatus::Processing, 30, None).unwrap();
        assert_eq!(after.progress, 60);
        assert_eq!(after.version, before.version);
    }

    #[test]
    fn archiving_failure_records_migrate_stage() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        set_status(&conn, job.id, JobStatus::Processing, 0, None).unwrap();
        set_status(&conn, job.id, JobStatus::Completed, 100, None).unwrap();
        set_status(&conn, job.id, JobStatus::Archiving, 0, None).unwrap();
        let j = set_status(&conn, job.id, JobStatus::Failed, 40, Some("1 of 21 uploads failed"))
            .unwrap();
        assert_eq!(j.failed_stage, Some(JobKind::Migrate));
    }

    #[test]
    fn finish_migration_requires_archiving() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        set_status(&conn, job.id, JobStatus::Processing, 0, None).unwrap();
        set_status(&conn, job.id, JobStatus::Completed, 100, None).unwrap();
        assert!(finish_migration(&conn, job.id, "hls/PHY/x/output.m3u8").is_err());

        set_status(&conn, job.id, JobStatus::Archiving, 0, None).unwrap();
        let j = finish_migration(&conn, job.id, "hls/PHY/x/output.m3u8").unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.storage_tier, StorageTier::Remote);
        assert_eq!(j.artifact_path.as_deref(), Some("hls/PHY/x/output.m3u8"));
    }

    #[test]
    fn artifact_location_update() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        let j = set_artifact_location(&conn, job.id, "/data/hls/x/output.m3u8", StorageTier::Local)
            .unwrap();
        assert_eq!(j.artifact_path.as_deref(), Some("/data/hls/x/output.m3u8"));
        assert!(set_artifact_location(&conn, JobId::new(), "/nope", StorageTier::Local).is_err());
    }

    #[test]
    fn retry_only_from_failed() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        assert!(matches!(
            retry_job(&conn, job.id, None),
            Err(Error::InvalidTransition { .. })
        ));

        set_status(&conn, job.id, JobStatus::Failed, 0, Some("queue full")).unwrap();
        let j = retry_job(&conn, job.id, Some("/uploads/moved.mp4")).unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.error, None);
        assert_eq!(j.source_path.as_deref(), Some("/uploads/moved.mp4"));
        assert_eq!(j.failed_stage, Some(JobKind::Convert));
    }

    #[test]
    fn list_with_filter() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        create_job(&conn, "Lecture 2", "PHY", None).unwrap();
        set_status(&conn, job.id, JobStatus::Processing, 0, None).unwrap();

        assert_eq!(list_jobs(&conn, None, 0, 100).unwrap().len(), 2);
        assert_eq!(list_jobs(&conn, Some(JobStatus::Pending), 0, 100).unwrap().len(), 1);
        assert_eq!(list_jobs(&conn, Some(JobStatus::Processing), 0, 100).unwrap().len(), 1);
        assert!(list_jobs(&conn, Some(JobStatus::Failed), 0, 100).unwrap().is_empty());
    }

    #[test]
    fn find_by_scoped_id_and_delete() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        let scoped = job.scoped_id.clone().unwrap();
        assert_eq!(find_by_scoped_id(&conn, &scoped).unwrap().unwrap().id, job.id);
        assert!(delete_job(&conn, job.id).unwrap());
        assert!(find_by_scoped_id(&conn, &scoped).unwrap().is_none());
        assert!(!delete_job(&conn, job.id).unwrap());
    }

    #[test]
    fn stale_jobs_listed_by_cutoff() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        set_status(&conn, job.id, JobStatus::Processing, 0, None).unwrap();

        assert!(list_stale(&conn, "2000-01-01T00:00:00.000Z").unwrap().is_empty());
        let stale = list_stale(&conn, "2999-01-01T00:00:00.000Z").unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, job.id);
    }

    #[test]
    fn drm_and_source_updates() {
        let (pool, job) = setup();
        let conn = pool.get().unwrap();
        assert!(set_drm_video_id(&conn, job.id, Some("vid-42")).unwrap());
        assert!(set_source_path(&conn, job.id, None).unwrap());
        let j = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(j.drm_video_id.as_deref(), Some("vid-42"));
        assert_eq!(j.source_path, None);
    }
}
