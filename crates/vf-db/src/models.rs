//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`.

use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;
use vf_core::{CorrelationId, JobId, JobKind, JobStatus, QueueEntryId, StorageTier};

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
}

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_failure(idx, e))?;
    Ok(T::from(uuid))
}

/// Parse a text column through the type's `FromStr`.
fn parse_text<T: FromStr<Err = String>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: String| conversion_failure(idx, e))
}

fn parse_opt_text<T: FromStr<Err = String>>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| v.parse().map_err(|e: String| conversion_failure(idx, e)))
        .transpose()
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Durable record of one uploaded source file moving through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub category: String,
    /// Directory / key component naming this job's artifacts. `None` only
    /// for legacy records, which the reconciler recovers from the path.
    pub scoped_id: Option<String>,
    pub source_path: Option<String>,
    /// Local manifest path, or the remote manifest key once migrated.
    pub artifact_path: Option<String>,
    pub storage_tier: StorageTier,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub failed_stage: Option<JobKind>,
    pub drm_video_id: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Job {
    /// Build from a row selected as all columns in table order.
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            scoped_id: row.get(3)?,
            source_path: row.get(4)?,
            artifact_path: row.get(5)?,
            storage_tier: parse_text(row, 6)?,
            status: parse_text(row, 7)?,
            progress: row.get::<_, i64>(8)?.clamp(0, 100) as u8,
            error: row.get(9)?,
            failed_stage: parse_opt_text(row, 10)?,
            drm_video_id: row.get(11)?,
            version: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    /// Creation time, used for the `<year>/<month>` artifact path segments.
    pub fn created(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now())
    }
}

// ---------------------------------------------------------------------------
// QueueEntry
// ---------------------------------------------------------------------------

/// A unit of work waiting for (or claimed by) a worker.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub job_id: JobId,
    pub kind: JobKind,
    /// Source file for a conversion, local manifest for a migration.
    pub source_path: String,
    pub scoped_id: String,
    pub category: String,
    pub correlation_id: CorrelationId,
    pub attempts: i64,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub enqueued_at: String,
}

impl QueueEntry {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            job_id: parse_id(row, 1)?,
            kind: parse_text(row, 2)?,
            source_path: row.get(3)?,
            scoped_id: row.get(4)?,
            category: row.get(5)?,
            correlation_id: parse_id(row, 6)?,
            attempts: row.get(7)?,
            locked_by: row.get(8)?,
            locked_at: row.get(9)?,
            enqueued_at: row.get(10)?,
        })
    }
}
