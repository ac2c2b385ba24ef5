//! Path reconciler.
//!
//! Jobs whose recorded artifact path drifted from where the artifact really
//! is (still pointing at the upload, or at a manifest that is not there) are
//! relocated by searching `<root>/hls/**/<scoped id>/output.m3u8`. A job is
//! only ever pointed at a manifest that passes the readiness check.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use vf_core::events::EventPayload;
use vf_core::job::is_scoped_id;
use vf_core::{Error, JobId, JobStatus, Result, StorageTier};
use vf_db::models::Job;
use vf_db::queries::jobs;
use vf_media::MANIFEST_NAME;

use crate::context::AppContext;

/// Message recorded on jobs abandoned by a lost worker.
pub const STALE_MESSAGE: &str = "stale: worker lost";

/// Summary of one [`reconcile_all`] sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub relocated: usize,
    pub unresolved: usize,
    pub stale_failed: usize,
}

/// Pull a scoped id out of a legacy path: any path component, or any
/// `_`/`-`/`.` separated piece of one, that looks like a scoped id.
pub fn scoped_id_from_path(path: &str) -> Option<String> {
    Path::new(path)
        .components()
        .rev()
        .filter_map(|c| c.as_os_str().to_str())
        .flat_map(|c| c.split(['_', '-', '.']))
        .find(|piece| is_scoped_id(piece))
        .map(str::to_string)
}

/// Whether the job's recorded pointer needs fixing.
fn needs_reconcile(ctx: &AppContext, job: &Job) -> bool {
    if job.status != JobStatus::Completed || job.storage_tier != StorageTier::Local {
        return false;
    }
    let Some(path) = job.artifact_path.as_deref().map(Path::new) else {
        return true;
    };
    path.starts_with(&ctx.config.storage.uploads_dir)
        || path.extension().and_then(|e| e.to_str()) != Some("m3u8")
        || !vf_media::is_ready(path)
}

/// Search the HLS tree for a ready manifest in a directory named
/// `scoped_id`.
pub fn find_manifest(hls_root: &Path, scoped_id: &str) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(hls_root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name().to_str() == Some(scoped_id))
        .map(|e| e.path().join(MANIFEST_NAME))
        .filter(|m| vf_media::is_ready(m))
        .collect();
    found.sort();
    found.into_iter().next()
}

fn older_than(path: &Path, grace: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .is_some_and(|age| age > grace)
}

/// Make sure a completed job points at a streamable manifest, relocating
/// the pointer when it drifted. Returns the (possibly updated) job.
///
/// Safe to call repeatedly; when no ready manifest can be found the job is
/// returned unchanged.
pub async fn resolve_for_streaming(ctx: &AppContext, job_id: JobId) -> Result<Job> {
    let job = ctx
        .with_conn("load job", |conn| jobs::require_job(conn, job_id))
        .await?;
    if !needs_reconcile(ctx, &job) {
        return Ok(job);
    }

    let scoped_id = job
        .scoped_id
        .clone()
        .or_else(|| job.artifact_path.as_deref().and_then(scoped_id_from_path))
        .or_else(|| job.source_path.as_deref().and_then(scoped_id_from_path));
    let Some(scoped_id) = scoped_id else {
        tracing::warn!(job_id = %job_id, "Cannot reconcile job without a scoped id");
        return Ok(job);
    };

    let hls_root = ctx.config.storage.hls_root();
    let lookup = {
        let scoped_id = scoped_id.clone();
        tokio::task::spawn_blocking(move || find_manifest(&hls_root, &scoped_id))
            .await
            .map_err(|e| Error::Internal(format!("manifest search failed: {e}")))?
    };
    let Some(manifest) = lookup else {
        tracing::warn!(job_id = %job_id, scoped_id = %scoped_id, "No ready manifest found");
        return Ok(job);
    };

    let manifest_str = manifest.to_string_lossy().to_string();
    let updated = ctx
        .with_conn("relocate artifact", |conn| {
            jobs::set_artifact_location(conn, job_id, &manifest_str, StorageTier::Local)
        })
        .await?;
    tracing::info!(
        job_id = %job_id,
        from = job.artifact_path.as_deref().unwrap_or("<none>"),
        to = %manifest_str,
        "Reconciled artifact pointer"
    );
    ctx.emit(EventPayload::JobReconciled {
        job_id,
        manifest: manifest_str,
    });

    if let Some(old) = job.artifact_path.as_deref().map(Path::new) {
        remove_stale_upload(ctx, &updated, old).await;
    }
    Ok(updated)
}

/// Remove the temporary upload the job used to point at, once it is older
/// than the grace window.
///
/// Only files in the uploads directory or the job's recorded source are
/// candidates; nothing under the HLS tree is ever removed.
async fn remove_stale_upload(ctx: &AppContext, job: &Job, old: &Path) {
    if !is_temporary_upload(ctx, job, old) || !old.is_file() {
        return;
    }

    let grace = Duration::from_secs(ctx.config.reconcile.source_grace_hours * 3600);
    if !older_than(old, grace) {
        tracing::debug!(job_id = %job.id, path = %old.display(), "Temporary source within grace window; keeping it");
        return;
    }

    match tokio::fs::remove_file(old).await {
        Ok(()) => {
            tracing::info!(job_id = %job.id, path = %old.display(), "Removed temporary source");
            if job.source_path.as_deref().map(Path::new) == Some(old) {
                let job_id = job.id;
                if let Err(e) = ctx
                    .with_conn("clear source", |conn| jobs::set_source_path(conn, job_id, None))
                    .await
                {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to clear source path");
                }
            }
        }
        Err(e) => tracing::warn!(job_id = %job.id, "Failed to remove temporary source: {e}"),
    }
}

fn is_temporary_upload(ctx: &AppContext, job: &Job, old: &Path) -> bool {
    if old.starts_with(ctx.config.storage.hls_root()) {
        return false;
    }
    old.starts_with(&ctx.config.storage.uploads_dir)
        || job.source_path.as_deref().map(Path::new) == Some(old)
}

/// Fail running jobs that no worker owns any more.
async fn sweep_stale(ctx: &AppContext) -> Result<usize> {
    let cutoff = chrono::Utc::now()
        - chrono::Duration::seconds(ctx.config.queue.lease_secs.min(i64::MAX as u64) as i64);
    let cutoff = vf_db::timestamp(cutoff);
    let stale = ctx
        .with_conn("list stale jobs", |conn| jobs::list_stale(conn, &cutoff))
        .await?;

    let mut failed = 0;
    for job in stale {
        let job_id = job.id;
        let result = ctx
            .with_conn("fail stale job", |conn| {
                jobs::set_status(conn, job_id, JobStatus::Failed, job.progress, Some(STALE_MESSAGE))
            })
            .await;
        match result {
            Ok(_) => {
                tracing::warn!(job_id = %job_id, status = %job.status, "Marked stale job failed");
                ctx.emit(EventPayload::JobFailed {
                    job_id,
                    error: STALE_MESSAGE.to_string(),
                });
                failed += 1;
            }
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Could not fail stale job"),
        }
    }
    Ok(failed)
}

/// Reconcile every completed local job and fail stale running jobs.
pub async fn reconcile_all(ctx: &AppContext) -> Result<ReconcileReport> {
    let candidates = ctx
        .with_conn("list completed jobs", jobs::list_completed_local)
        .await?;

    let mut report = ReconcileReport::default();
    for job in candidates {
        report.checked += 1;
        if !needs_reconcile(ctx, &job) {
            continue;
        }
        let before = job.artifact_path.clone();
        match resolve_for_streaming(ctx, job.id).await {
            Ok(updated) if updated.artifact_path != before => report.relocated += 1,
            Ok(_) => report.unresolved += 1,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Reconcile failed");
                report.unresolved += 1;
            }
        }
    }

    report.stale_failed = sweep_stale(ctx).await?;
    tracing::info!(
        checked = report.checked,
        relocated = report.relocated,
        unresolved = report.unresolved,
        stale_failed = report.stale_failed,
        "Reconcile sweep finished"
    );
    Ok(report)
}

/// Run [`reconcile_all`] now and then every `sweep_interval_secs` until
/// cancelled. An interval of 0 runs the startup sweep only.
pub async fn run_sweeps(ctx: AppContext, cancel: CancellationToken) {
    let interval_secs = ctx.config.reconcile.sweep_interval_secs;
    if interval_secs == 0 {
        if let Err(e) = reconcile_all(&ctx).await {
            tracing::error!("Reconcile sweep error: {e}");
        }
        return;
    }
    let interval = Duration::from_secs(interval_secs);
    tracing::info!(interval_secs, "Reconciler started");

    loop {
        if let Err(e) = reconcile_all(&ctx).await {
            tracing::error!("Reconcile sweep error: {e}");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => { break; }
        }
    }

    tracing::info!("Reconciler stopped");
}
