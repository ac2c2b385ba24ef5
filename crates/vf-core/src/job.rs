//! Job state machine.
//!
//! A job moves `pending -> processing -> {completed | failed}`. Tiering adds
//! `completed(local) -> archiving -> completed(remote)`. `failed` only leaves
//! through an explicit operator retry back to `pending`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Progress value that marks a stage as finished.
pub const PROGRESS_SATURATED: u8 = 100;

/// Processing status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Archiving,
}

impl JobStatus {
    /// Apply the saturation rule: a `processing` write at 100% is a
    /// completion.
    pub fn resolve(self, progress: u8) -> JobStatus {
        match self {
            JobStatus::Processing if progress >= PROGRESS_SATURATED => JobStatus::Completed,
            other => other,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Same-state writes for the two running states are progress updates.
    /// `Failed -> Pending` is only legal through an operator retry, which
    /// passes `retry = true`.
    pub fn can_transition(self, next: JobStatus, retry: bool) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Processing) | (Pending, Failed) => true,
            (Processing, Processing) | (Processing, Completed) | (Processing, Failed) => true,
            (Completed, Archiving) => true,
            (Archiving, Archiving) | (Archiving, Completed) | (Archiving, Failed) => true,
            (Failed, Pending) => retry,
            _ => false,
        }
    }

    /// Whether a worker is currently expected to own the job.
    pub fn is_running(self) -> bool {
        matches!(self, JobStatus::Processing | JobStatus::Archiving)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Archiving => "archiving",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "archiving" => Ok(Self::Archiving),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// Where a job's artifacts currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Local,
    Remote,
}

impl StorageTier {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageTier::Local => "local",
            StorageTier::Remote => "remote",
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            _ => Err(format!("Invalid storage tier: {s}")),
        }
    }
}

/// Kind of work a queue entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Convert,
    Migrate,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Convert => "convert",
            JobKind::Migrate => "migrate",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "convert" => Ok(Self::Convert),
            "migrate" => Ok(Self::Migrate),
            _ => Err(format!("Invalid job kind: {s}")),
        }
    }
}

/// Generate a fresh job-scoped id: 16 lowercase hex characters.
///
/// The scoped id names the artifact directory and remote key prefix, so it
/// must be filesystem- and URL-safe.
pub fn new_scoped_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    uuid.simple().to_string()[..16].to_string()
}

/// Whether `s` looks like a scoped id produced by [`new_scoped_id`].
pub fn is_scoped_id(s: &str) -> bool {
    s.len() == 16 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
