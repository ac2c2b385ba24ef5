//! Conversion stage: source file to a local HLS artifact.

use std::path::{Path, PathBuf};

use vf_core::events::EventPayload;
use vf_core::{Error, JobStatus, Result, StorageTier};
use vf_db::models::{Job, QueueEntry};
use vf_db::queries::jobs;
use vf_media::Repaired;

use crate::context::AppContext;
use crate::pool::will_redeliver;
use crate::progress::ProgressWriter;
use crate::service;

/// Local artifact directory for a job.
pub fn artifact_dir(ctx: &AppContext, job: &Job, scoped_id: &str) -> PathBuf {
    ctx.config
        .storage
        .hls_root()
        .join(vf_storage::artifact_rel_dir(&job.category, job.created(), scoped_id))
}

/// Run one conversion entry to completion.
///
/// Every failure after the job entered `processing` is recorded as
/// `failed` before the error is returned, unless the entry is going to be
/// redelivered.
pub async fn run_conversion(ctx: &AppContext, entry: &QueueEntry) -> Result<()> {
    let job_id = entry.job_id;
    let Some(job) = ctx
        .with_conn("load job", |conn| jobs::get_job(conn, job_id))
        .await?
    else {
        tracing::warn!(job_id = %job_id, "Job vanished before conversion; dropping entry");
        return Ok(());
    };

    if job.status == JobStatus::Completed {
        tracing::info!(job_id = %job_id, "Job already completed; skipping conversion");
        return Ok(());
    }

    let job = ctx
        .with_conn("start job", |conn| {
            jobs::set_status(conn, job_id, JobStatus::Processing, 0, None)
        })
        .await?;
    ctx.emit(EventPayload::JobStarted { job_id });

    match convert(ctx, &job, entry).await {
        Ok(job) => {
            after_success(ctx, &job).await;
            Ok(())
        }
        Err(e) => {
            if will_redeliver(entry, &e, ctx.config.queue.retry.max_retries) {
                tracing::warn!(job_id = %job_id, error = %e, "Transient conversion failure; entry will be redelivered");
            } else {
                mark_failed(ctx, job_id, &e).await;
            }
            Err(e)
        }
    }
}

async fn convert(ctx: &AppContext, job: &Job, entry: &QueueEntry) -> Result<Job> {
    let job_id = job.id;
    let scoped_id = job.scoped_id.as_deref().unwrap_or(&entry.scoped_id);
    let output_dir = artifact_dir(ctx, job, scoped_id);
    let source = Path::new(&entry.source_path);

    tracing::info!(
        job_id = %job_id,
        correlation_id = %entry.correlation_id,
        source = %source.display(),
        output = %output_dir.display(),
        "Converting"
    );

    let writer = ProgressWriter::spawn(ctx, job_id, JobStatus::Processing);
    let encoded = ctx
        .encoder
        .encode(source, &output_dir, |pct| writer.report(pct))
        .await;
    writer.finish().await;
    let manifest = encoded?;

    let default_duration = f64::from(ctx.config.encoder.segment_seconds.max(1));
    let repaired = {
        let manifest = manifest.clone();
        tokio::task::spawn_blocking(move || vf_media::ensure_playable(&manifest, default_duration))
            .await
            .map_err(|e| Error::Internal(format!("manifest task failed: {e}")))?
            .map_err(|e| Error::Transcode(format!("unusable manifest: {e}")))?
    };
    if let Repaired::Rebuilt { segments } = repaired {
        tracing::warn!(job_id = %job_id, segments, "Manifest was rebuilt after encode");
    }
    vf_media::readiness(&manifest)
        .map_err(|why| Error::Transcode(format!("{}: {why}", manifest.display())))?;

    let manifest_str = manifest.to_string_lossy().to_string();
    ctx.with_conn("record artifact", |conn| {
        jobs::set_artifact_location(conn, job_id, &manifest_str, StorageTier::Local)
    })
    .await?;

    // A processing write at 100% is stored as `completed`.
    let job = ctx
        .with_conn("complete job", |conn| {
            jobs::set_status(conn, job_id, JobStatus::Processing, 100, None)
        })
        .await?;

    tracing::info!(job_id = %job_id, manifest = %manifest_str, "Conversion completed");
    ctx.emit(EventPayload::JobCompleted {
        job_id,
        tier: StorageTier::Local,
    });
    Ok(job)
}

async fn after_success(ctx: &AppContext, job: &Job) {
    let auto_migrate = ctx.config.queue.auto_migrate && ctx.store.is_some();

    if auto_migrate {
        if let Err(e) = service::enqueue_migration_for(ctx, job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Could not queue automatic migration");
        }
    } else if ctx.config.storage.delete_source_on_success {
        remove_source(ctx, job).await;
    }
}

/// Delete the original upload once the pipeline no longer needs it.
pub(crate) async fn remove_source(ctx: &AppContext, job: &Job) {
    let Some(source) = job.source_path.as_deref() else {
        return;
    };
    match tokio::fs::remove_file(source).await {
        Ok(()) => tracing::info!(job_id = %job.id, source, "Removed source file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(job_id = %job.id, source, "Failed to remove source file: {e}");
            return;
        }
    }
    let job_id = job.id;
    if let Err(e) = ctx
        .with_conn("clear source", |conn| jobs::set_source_path(conn, job_id, None))
        .await
    {
        tracing::warn!(job_id = %job_id, error = %e, "Failed to clear source path");
    }
}

/// Record a stage failure on the job and broadcast it.
pub(crate) async fn mark_failed(ctx: &AppContext, job_id: vf_core::JobId, err: &Error) {
    let message = err.to_string();
    tracing::error!(job_id = %job_id, error = %message, "Job failed");

    let current = ctx
        .with_conn("load job", |conn| jobs::get_job(conn, job_id))
        .await
        .ok()
        .flatten();
    let progress = current.as_ref().map_or(0, |j| j.progress);

    let result = ctx
        .with_conn("fail job", |conn| {
            jobs::set_status(conn, job_id, JobStatus::Failed, progress, Some(message.as_str()))
        })
        .await;
    match result {
        Ok(_) => ctx.emit(EventPayload::JobFailed {
            job_id,
            error: message,
        }),
        Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Could not record failure"),
    }
}
