//! vf-db: database access and persistence layer.
//!
//! This crate provides SQLite-backed storage with connection pooling,
//! embedded migrations, typed models, and the query modules behind the job
//! state store and the durable task queue.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;

/// Current time in the fixed-width RFC 3339 form stored in every timestamp
/// column, so lexical comparison in SQL matches chronological order.
pub fn now_rfc3339() -> String {
    timestamp(chrono::Utc::now())
}

/// Format `t` the same way [`now_rfc3339`] does.
pub fn timestamp(t: chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
