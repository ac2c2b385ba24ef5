//! Unified error type for the vodforge pipeline.
//!
//! Every stage funnels its failures into [`Error`]. The variants mirror the
//! pipeline's failure classes (input, transcode, migration, queue) so each
//! one maps onto exactly one job-status update, and the API layer can derive
//! an HTTP status code via [`Error::http_status`].

use std::fmt;

use crate::job::JobStatus;

/// Unified error type covering all failure modes in vodforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "manifest").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The upload was rejected before it reached the queue
    /// (oversized file, unsupported type).
    #[error("Input rejected: {0}")]
    Input(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A job status change violates the state machine.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Status currently stored for the job.
        from: JobStatus,
        /// Status that was requested.
        to: JobStatus,
    },

    /// Encoding failed: non-zero exit, timeout or missing output.
    #[error("Transcode failed: {0}")]
    Transcode(String),

    /// One or more artifact uploads failed; nothing was transitioned.
    #[error("Migration failed: {failed} of {total} uploads failed: {message}")]
    Migration {
        /// Number of files that could not be uploaded.
        failed: usize,
        /// Number of files in the artifact directory.
        total: usize,
        /// First failure, for the diagnostic.
        message: String,
    },

    /// The task queue rejected the entry or is unavailable.
    #[error("Queue error: {0}")]
    Queue(String),

    /// The remote object store failed.
    #[error("Storage error [{key}]: {message}")]
    Storage {
        /// Object key the operation targeted.
        key: String,
        /// Human-readable error description.
        message: String,
        /// Whether the failure looks like a connectivity blip.
        transient: bool,
    },

    /// The DRM-hosted video collaborator failed.
    #[error("DRM service error: {message}")]
    Drm {
        /// Human-readable error description.
        message: String,
        /// Whether the failure looks like a connectivity blip.
        transient: bool,
    },

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Input(_) => 413,
            Error::Validation(_) => 400,
            Error::InvalidTransition { .. } => 409,
            Error::Transcode(_) => 500,
            Error::Migration { .. } => 502,
            Error::Queue(_) => 503,
            Error::Storage { .. } => 502,
            Error::Drm { .. } => 502,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Whether a retry with backoff may succeed.
    ///
    /// Only queue/connectivity failures qualify. Encoder failures never do.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database { source } => {
                let msg = source.to_string().to_ascii_lowercase();
                msg.contains("is locked") || msg.contains("is busy")
            }
            Error::Storage { transient, .. } | Error::Drm { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Storage`].
    pub fn storage(key: impl Into<String>, message: impl Into<String>, transient: bool) -> Self {
        Error::Storage {
            key: key.into(),
            message: message.into(),
            transient,
        }
    }

    /// Convenience constructor for [`Error::Drm`].
    pub fn drm(message: impl Into<String>, transient: bool) -> Self {
        Error::Drm {
            message: message.into(),
            transient,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
