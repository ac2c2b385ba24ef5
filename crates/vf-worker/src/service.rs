//! Service operations consumed by the API layer and the CLI.
//!
//! Every function takes the shared [`AppContext`] and returns domain errors;
//! mapping them to HTTP responses (via [`vf_core::Error::http_status`]) is the
//! caller's business.

use std::path::{Path, PathBuf};

use serde::Serialize;

use vf_core::events::EventPayload;
use vf_core::{Error, JobId, JobKind, JobStatus, Result, StorageTier};
use vf_db::models::{Job, QueueEntry};
use vf_db::queries::{jobs, queue};
use vf_storage::UploadCredentials;

use crate::context::AppContext;

/// Polling view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub storage_tier: StorageTier,
    pub artifact_path: Option<String>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
            storage_tier: job.storage_tier,
            artifact_path: job.artifact_path.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Upload acceptance
// ---------------------------------------------------------------------------

/// Check an uploaded file against the size and extension limits.
pub fn validate_upload(ctx: &AppContext, source: &Path) -> Result<u64> {
    let limits = &ctx.config.uploads;

    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !limits
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    {
        return Err(Error::Input(format!(
            "unsupported file type '{}'; allowed: {}",
            if ext.is_empty() { "<none>" } else { ext.as_str() },
            limits.allowed_extensions.join(", ")
        )));
    }

    let meta = std::fs::metadata(source)
        .map_err(|e| Error::Input(format!("cannot read {}: {e}", source.display())))?;
    if !meta.is_file() {
        return Err(Error::Input(format!("{} is not a file", source.display())));
    }
    if meta.len() == 0 {
        return Err(Error::Input("uploaded file is empty".into()));
    }
    if meta.len() > limits.max_bytes {
        return Err(Error::Input(format!(
            "file is {} bytes; the limit is {} bytes",
            meta.len(),
            limits.max_bytes
        )));
    }
    Ok(meta.len())
}

/// Accept an upload: validate it and record a `pending` job.
pub async fn create_job(ctx: &AppContext, name: &str, category: &str, source: &Path) -> Result<Job> {
    if name.trim().is_empty() {
        return Err(Error::Input("name must not be empty".into()));
    }
    if category.trim().is_empty() {
        return Err(Error::Input("category must not be empty".into()));
    }
    let size = validate_upload(ctx, source)?;

    let source_str = source.to_string_lossy().to_string();
    let job = ctx
        .with_conn("create job", |conn| {
            jobs::create_job(conn, name.trim(), category.trim(), Some(source_str.as_str()))
        })
        .await?;

    tracing::info!(job_id = %job.id, size, source = %source.display(), "Job created");
    Ok(job)
}

// ---------------------------------------------------------------------------
// Enqueueing
// ---------------------------------------------------------------------------

/// Queue a conversion. When the queue rejects the entry the job is marked
/// `failed` with the queue error instead of being left `pending`.
pub async fn enqueue_conversion(
    ctx: &AppContext,
    job_id: JobId,
    source_path: &str,
    scoped_id: &str,
    category: &str,
) -> Result<QueueEntry> {
    let entry = queue::NewEntry {
        job_id,
        kind: JobKind::Convert,
        source_path,
        scoped_id,
        category,
    };
    let capacity = ctx.config.queue.capacity;
    let result = ctx
        .with_conn("enqueue conversion", |conn| queue::enqueue(conn, &entry, capacity))
        .await;

    match result {
        Ok(entry) => {
            tracing::info!(job_id = %job_id, correlation_id = %entry.correlation_id, "Conversion queued");
            ctx.emit(EventPayload::JobQueued { job_id });
            Ok(entry)
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to queue conversion");
            fail_pending_job(ctx, job_id, &e).await;
            Err(e)
        }
    }
}

/// Record a failure on a job that never reached a worker, so it does not
/// sit in `pending` without a queue entry.
async fn fail_pending_job(ctx: &AppContext, job_id: JobId, err: &Error) {
    let message = err.to_string();
    let marked = ctx
        .with_conn("mark intake failure", |conn| {
            jobs::set_status(conn, job_id, JobStatus::Failed, 0, Some(message.as_str()))
        })
        .await;
    match marked {
        Ok(_) => ctx.emit(EventPayload::JobFailed {
            job_id,
            error: message,
        }),
        Err(mark_err) => {
            tracing::warn!(job_id = %job_id, error = %mark_err, "Could not mark job failed")
        }
    }
}

/// Queue a migration of a `completed(local)` job's artifacts.
///
/// A queue rejection is returned to the caller; the job stays
/// `completed(local)` since that is still a valid, streamable state.
pub async fn enqueue_migration(
    ctx: &AppContext,
    job_id: JobId,
    local_artifact_path: &str,
    scoped_id: &str,
    category: &str,
) -> Result<QueueEntry> {
    ctx.remote_store()?;

    let job = ctx
        .with_conn("load job", |conn| jobs::require_job(conn, job_id))
        .await?;
    if job.status != JobStatus::Completed || job.storage_tier != StorageTier::Local {
        return Err(Error::Validation(format!(
            "job {job_id} is {} on the {} tier; only completed local jobs can migrate",
            job.status, job.storage_tier
        )));
    }

    let entry = queue::NewEntry {
        job_id,
        kind: JobKind::Migrate,
        source_path: local_artifact_path,
        scoped_id,
        category,
    };
    let capacity = ctx.config.queue.capacity;
    let entry = ctx
        .with_conn("enqueue migration", |conn| queue::enqueue(conn, &entry, capacity))
        .await?;

    tracing::info!(job_id = %job_id, correlation_id = %entry.correlation_id, "Migration queued");
    ctx.emit(EventPayload::JobQueued { job_id });
    Ok(entry)
}

/// Queue a migration using the job's own recorded artifact location.
pub async fn enqueue_migration_for(ctx: &AppContext, job_id: JobId) -> Result<QueueEntry> {
    let job = ctx
        .with_conn("load job", |conn| jobs::require_job(conn, job_id))
        .await?;
    let artifact = job
        .artifact_path
        .as_deref()
        .ok_or_else(|| Error::Validation(format!("job {job_id} has no artifact")))?;
    let scoped_id = job
        .scoped_id
        .as_deref()
        .ok_or_else(|| Error::Validation(format!("job {job_id} has no scoped id")))?;
    enqueue_migration(ctx, job_id, artifact, scoped_id, &job.category).await
}

/// Full upload path: accept the file, stage it in the uploads directory as
/// `<scoped id>_<file name>` and queue the conversion.
///
/// Files already inside the uploads directory are used in place. Once the
/// job row exists, any staging failure marks it `failed`.
pub async fn submit(ctx: &AppContext, name: &str, category: &str, source: &Path) -> Result<Job> {
    let job = create_job(ctx, name, category, source).await?;
    let job_id = job.id;

    let (staged, scoped_id) = match stage_upload(ctx, &job, source).await {
        Ok(staged) => staged,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to stage upload");
            fail_pending_job(ctx, job_id, &e).await;
            return Err(e);
        }
    };

    enqueue_conversion(ctx, job_id, &staged, &scoped_id, &job.category).await?;
    get_job(ctx, job_id).await
}

/// Copy the upload into place and record it as the job's source.
async fn stage_upload(ctx: &AppContext, job: &Job, source: &Path) -> Result<(String, String)> {
    let job_id = job.id;
    let scoped_id = job
        .scoped_id
        .clone()
        .ok_or_else(|| Error::Internal(format!("job {job_id} was created without a scoped id")))?;

    let uploads = &ctx.config.storage.uploads_dir;
    let staged = if source.starts_with(uploads) {
        source.to_path_buf()
    } else {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let staged = uploads.join(format!("{scoped_id}_{file_name}"));
        tokio::fs::create_dir_all(uploads).await?;
        if let Err(e) = tokio::fs::copy(source, &staged).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }
        staged
    };

    let staged_str = staged.to_string_lossy().to_string();
    ctx.with_conn("record source", |conn| {
        jobs::set_source_path(conn, job_id, Some(staged_str.as_str()))
    })
    .await?;
    Ok((staged_str, scoped_id))
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

pub async fn get_job(ctx: &AppContext, job_id: JobId) -> Result<Job> {
    ctx.with_conn("load job", |conn| jobs::require_job(conn, job_id))
        .await
}

pub async fn get_status(ctx: &AppContext, job_id: JobId) -> Result<JobStatusView> {
    let job = get_job(ctx, job_id).await?;
    Ok(JobStatusView::from(&job))
}

// ---------------------------------------------------------------------------
// Operator retry
// ---------------------------------------------------------------------------

/// Find the original source for a failed job: the recorded path if it
/// still exists, else a file in the uploads directory whose name contains
/// the scoped id.
pub fn relocate_source(ctx: &AppContext, job: &Job) -> Option<PathBuf> {
    if let Some(path) = job.source_path.as_deref().map(Path::new) {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }

    let scoped_id = job.scoped_id.as_deref()?;
    let uploads = &ctx.config.storage.uploads_dir;
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(uploads)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| e.file_name().to_string_lossy().contains(scoped_id))
        .map(|e| e.path())
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Operator retry of a `failed` job.
///
/// A job that failed during migration and still has a playable local
/// artifact goes back to `completed(local)` and is re-queued for
/// migration. Anything else is re-queued for conversion from its
/// relocated source.
pub async fn retry_job(ctx: &AppContext, job_id: JobId) -> Result<Job> {
    let job = get_job(ctx, job_id).await?;
    if job.status != JobStatus::Failed {
        return Err(Error::InvalidTransition {
            from: job.status,
            to: JobStatus::Pending,
        });
    }

    let local_manifest = job
        .artifact_path
        .as_deref()
        .filter(|_| job.storage_tier == StorageTier::Local)
        .map(PathBuf::from)
        .filter(|p| vf_media::is_ready(p));

    if let (Some(JobKind::Migrate), Some(manifest)) = (job.failed_stage, local_manifest) {
        if ctx.store.is_some() {
            return retry_migration(ctx, &job, &manifest).await;
        }
    }

    let source = relocate_source(ctx, &job).ok_or_else(|| {
        Error::not_found("source file", job.source_path.as_deref().unwrap_or("<unknown>"))
    })?;
    let source_str = source.to_string_lossy().to_string();
    let scoped_id = job
        .scoped_id
        .clone()
        .ok_or_else(|| Error::Validation(format!("job {job_id} has no scoped id")))?;

    let job = ctx
        .with_conn("retry job", |conn| jobs::retry_job(conn, job_id, Some(source_str.as_str())))
        .await?;
    tracing::info!(job_id = %job_id, source = %source_str, "Retrying conversion");

    enqueue_conversion(ctx, job_id, &source_str, &scoped_id, &job.category).await?;
    get_job(ctx, job_id).await
}

async fn retry_migration(ctx: &AppContext, job: &Job, manifest: &Path) -> Result<Job> {
    let job_id = job.id;
    let scoped_id = job
        .scoped_id
        .clone()
        .ok_or_else(|| Error::Validation(format!("job {job_id} has no scoped id")))?;
    let manifest_str = manifest.to_string_lossy().to_string();

    ctx.with_conn("retry job", |conn| jobs::retry_job(conn, job_id, None))
        .await?;
    ctx.with_conn("restart job", |conn| {
        jobs::set_status(conn, job_id, JobStatus::Processing, 0, None)
    })
    .await?;
    // Readiness was checked by the caller; the artifact is complete.
    ctx.with_conn("complete job", |conn| {
        jobs::set_status(conn, job_id, JobStatus::Processing, 100, None)
    })
    .await?;
    tracing::info!(job_id = %job_id, "Local artifact intact; retrying migration");

    enqueue_migration(ctx, job_id, &manifest_str, &scoped_id, &job.category).await?;
    get_job(ctx, job_id).await
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

/// Whether `path` lies inside `root` (lexically, after normalizing `..`).
fn is_within(path: &Path, root: &Path) -> bool {
    use std::path::Component;
    let mut normalized = PathBuf::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized.starts_with(root) && normalized != root
}

/// Delete a job and everything it owns: the DRM-hosted video, remote
/// objects, the local artifact directory and the source file.
///
/// External resources are released first; if that fails the job row is
/// kept so the delete can be retried.
pub async fn delete_job(ctx: &AppContext, job_id: JobId) -> Result<()> {
    let job = get_job(ctx, job_id).await?;
    if job.status.is_running() {
        return Err(Error::Validation(format!(
            "job {job_id} is {}; delete it once the worker is done",
            job.status
        )));
    }

    if let Some(video_id) = job.drm_video_id.as_deref() {
        match &ctx.drm {
            Some(drm) => {
                let drm = drm.clone();
                vf_core::retry::retry_transient(&ctx.config.queue.retry, "drm delete", || {
                    let drm = drm.clone();
                    async move { drm.delete_video(video_id).await }
                })
                .await?;
            }
            None => tracing::warn!(job_id = %job_id, video_id, "DRM disabled; hosted video left in place"),
        }
    }

    if let (StorageTier::Remote, Some(key)) = (job.storage_tier, job.artifact_path.as_deref()) {
        let store = ctx.remote_store()?;
        let removed = vf_storage::delete_remote_artifact(store.as_ref(), key).await?;
        tracing::info!(job_id = %job_id, removed, "Deleted remote objects");
    }

    let hls_root = ctx.config.storage.hls_root();
    if let (StorageTier::Local, Some(manifest)) = (job.storage_tier, job.artifact_path.as_deref()) {
        let manifest = Path::new(manifest);
        match manifest.parent() {
            Some(dir) if is_within(dir, &hls_root) && dir.is_dir() => {
                if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                    tracing::warn!(job_id = %job_id, dir = %dir.display(), "Failed to remove artifact directory: {e}");
                }
            }
            _ => tracing::debug!(job_id = %job_id, "No local artifact directory to remove"),
        }
    }

    if let Some(source) = job.source_path.as_deref().map(Path::new) {
        match tokio::fs::remove_file(source).await {
            Ok(()) => tracing::debug!(job_id = %job_id, source = %source.display(), "Removed source file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(job_id = %job_id, "Failed to remove source file: {e}"),
        }
    }

    ctx.with_conn("delete job", |conn| jobs::delete_job(conn, job_id))
        .await?;
    tracing::info!(job_id = %job_id, "Job deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// DRM-hosted uploads
// ---------------------------------------------------------------------------

/// Ask the DRM provider for direct-upload credentials and remember the
/// video id on the job so deletion can release it.
pub async fn request_drm_upload(ctx: &AppContext, job_id: JobId) -> Result<UploadCredentials> {
    let drm = ctx
        .drm
        .clone()
        .ok_or_else(|| Error::Validation("DRM hosting is disabled".into()))?;
    let job = get_job(ctx, job_id).await?;

    let creds = vf_core::retry::retry_transient(&ctx.config.queue.retry, "drm credentials", || {
        let drm = drm.clone();
        let name = job.name.clone();
        async move { drm.issue_upload_credentials(&name).await }
    })
    .await?;

    ctx.with_conn("record drm video", |conn| {
        jobs::set_drm_video_id(conn, job_id, Some(creds.video_id.as_str()))
    })
    .await?;
    Ok(creds)
}

/// Current provider-side status of the job's hosted video.
pub async fn drm_status(ctx: &AppContext, job_id: JobId) -> Result<vf_storage::DrmVideoStatus> {
    let drm = ctx
        .drm
        .clone()
        .ok_or_else(|| Error::Validation("DRM hosting is disabled".into()))?;
    let job = get_job(ctx, job_id).await?;
    let video_id = job
        .drm_video_id
        .ok_or_else(|| Error::not_found("drm video for job", job_id))?;
    vf_core::retry::retry_transient(&ctx.config.queue.retry, "drm status", || {
        let drm = drm.clone();
        let video_id = video_id.clone();
        async move { drm.video_status(&video_id).await }
    })
    .await
}
