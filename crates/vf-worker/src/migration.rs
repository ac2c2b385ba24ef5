//! Migration stage: local artifact to the remote tier.

use std::path::Path;

use vf_core::events::EventPayload;
use vf_core::{Error, JobStatus, Result, StorageTier};
use vf_db::models::{Job, QueueEntry};
use vf_db::queries::jobs;
use vf_storage::Migrator;

use crate::context::AppContext;
use crate::pool::will_redeliver;
use crate::conversion::{mark_failed, remove_source};
use crate::progress::ProgressWriter;

/// Run one migration entry to completion.
///
/// Nothing about the job's tier or pointer changes unless every file was
/// uploaded. The local directory is removed only after the pointer rewrite
/// is committed.
pub async fn run_migration(ctx: &AppContext, entry: &QueueEntry) -> Result<()> {
    let job_id = entry.job_id;
    let Some(job) = ctx
        .with_conn("load job", |conn| jobs::get_job(conn, job_id))
        .await?
    else {
        tracing::warn!(job_id = %job_id, "Job vanished before migration; dropping entry");
        return Ok(());
    };

    if job.storage_tier == StorageTier::Remote {
        tracing::info!(job_id = %job_id, "Job already on the remote tier; skipping migration");
        return Ok(());
    }

    let job = match job.status {
        JobStatus::Completed => {
            ctx.with_conn("start migration", |conn| {
                jobs::set_status(conn, job_id, JobStatus::Archiving, 0, None)
            })
            .await?
        }
        // Redelivered after a lost worker.
        JobStatus::Archiving => job,
        other => {
            return Err(Error::InvalidTransition {
                from: other,
                to: JobStatus::Archiving,
            })
        }
    };
    ctx.emit(EventPayload::JobStarted { job_id });

    match migrate(ctx, &job, entry).await {
        Ok(job) => {
            if ctx.config.storage.delete_source_on_success {
                remove_source(ctx, &job).await;
            }
            Ok(())
        }
        Err(e) if will_redeliver(entry, &e, ctx.config.queue.retry.max_retries) => {
            tracing::warn!(job_id = %job_id, error = %e, "Transient migration failure; entry will be redelivered");
            Err(e)
        }
        Err(e) => {
            if let Error::Migration { failed, total, .. } = &e {
                ctx.emit(EventPayload::MigrationFailed {
                    job_id,
                    failed: *failed,
                    total: *total,
                });
            }
            mark_failed(ctx, job_id, &e).await;
            Err(e)
        }
    }
}

async fn migrate(ctx: &AppContext, job: &Job, entry: &QueueEntry) -> Result<Job> {
    let job_id = job.id;
    let store = ctx.remote_store()?.clone();

    let manifest = Path::new(&entry.source_path);
    vf_media::readiness(manifest).map_err(|why| {
        Error::Validation(format!("local artifact {} is not ready: {why}", manifest.display()))
    })?;
    let local_dir = manifest
        .parent()
        .ok_or_else(|| Error::Validation(format!("invalid artifact path {}", manifest.display())))?;

    let scoped_id = job.scoped_id.as_deref().unwrap_or(&entry.scoped_id);
    let remote = &ctx.config.remote;
    let prefix = vf_storage::remote_prefix(&remote.key_prefix, &job.category, job.created(), scoped_id);

    let total_files = vf_storage::migrator::artifact_files(local_dir)?.len();
    tracing::info!(
        job_id = %job_id,
        correlation_id = %entry.correlation_id,
        prefix = %prefix,
        total_files,
        "Migrating"
    );
    ctx.emit(EventPayload::MigrationStarted { job_id, total_files });

    let writer = ProgressWriter::spawn(ctx, job_id, JobStatus::Archiving);
    let migrator = Migrator::new(store.as_ref(), ctx.config.queue.retry, remote.progress_every);
    let outcome = migrator
        .migrate_dir(local_dir, &prefix, |uploaded, total| {
            ctx.emit(EventPayload::MigrationProgress {
                job_id,
                uploaded,
                total,
            });
            if total > 0 {
                // 100 is reserved for the pointer rewrite.
                writer.report((uploaded * 100 / total).min(99) as u8);
            }
        })
        .await;
    writer.finish().await;
    let outcome = outcome?;

    let job = ctx
        .with_conn("finish migration", |conn| {
            jobs::finish_migration(conn, job_id, &outcome.manifest_key)
        })
        .await?;

    tracing::info!(
        job_id = %job_id,
        manifest = %outcome.manifest_key,
        uploaded = outcome.uploaded,
        "Migration completed"
    );
    ctx.emit(EventPayload::MigrationCompleted {
        job_id,
        remote_prefix: outcome.remote_prefix.clone(),
    });
    ctx.emit(EventPayload::JobCompleted {
        job_id,
        tier: StorageTier::Remote,
    });

    if let Err(e) = tokio::fs::remove_dir_all(local_dir).await {
        tracing::warn!(job_id = %job_id, dir = %local_dir.display(), "Failed to remove local artifacts: {e}");
    }
    Ok(job)
}
