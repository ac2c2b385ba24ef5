//! Worker pool.
//!
//! A fixed number of workers poll the durable queue. Each claim carries a
//! lease; an entry whose worker died becomes claimable again once the lease
//! expires. Entries are removed only after their handler returns.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vf_core::{Error, JobKind, Result};
use vf_db::models::QueueEntry;
use vf_db::queries::queue;

use crate::context::AppContext;
use crate::conversion::run_conversion;
use crate::migration::run_migration;

/// What happened to a claimed entry after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handler finished (successfully or with a recorded failure).
    Acked,
    /// Transient failure; the entry goes back to the queue.
    Released,
}

/// Worker identifier, unique per process and slot.
pub fn worker_id(slot: usize) -> String {
    format!("vf-worker-{}-{slot}", std::process::id())
}

async fn dispatch(ctx: &AppContext, entry: &QueueEntry) -> Result<()> {
    match entry.kind {
        JobKind::Convert => run_conversion(ctx, entry).await,
        JobKind::Migrate => run_migration(ctx, entry).await,
    }
}

/// Whether a failed entry is worth another delivery.
pub(crate) fn will_redeliver(entry: &QueueEntry, err: &Error, max_retries: u32) -> bool {
    err.is_transient() && entry.attempts <= i64::from(max_retries)
}

fn disposition(entry: &QueueEntry, result: &Result<()>, max_retries: u32) -> Disposition {
    match result {
        Err(e) if will_redeliver(entry, e, max_retries) => Disposition::Released,
        _ => Disposition::Acked,
    }
}

/// Claim and run one entry.
///
/// Returns `Ok(None)` when the queue had nothing claimable.
pub async fn process_next(ctx: &AppContext, worker: &str) -> Result<Option<Disposition>> {
    let lease = Duration::from_secs(ctx.config.queue.lease_secs);
    let Some(entry) = ctx
        .with_conn("claim entry", |conn| queue::claim_next(conn, worker, lease))
        .await?
    else {
        return Ok(None);
    };

    tracing::info!(
        worker,
        entry_id = %entry.id,
        job_id = %entry.job_id,
        kind = %entry.kind,
        attempts = entry.attempts,
        correlation_id = %entry.correlation_id,
        "Claimed queue entry"
    );

    let result = dispatch(ctx, &entry).await;
    let outcome = disposition(&entry, &result, ctx.config.queue.retry.max_retries);

    let entry_id = entry.id;
    match outcome {
        Disposition::Acked => {
            ctx.with_conn("ack entry", |conn| queue::ack(conn, entry_id))
                .await?;
        }
        Disposition::Released => {
            tracing::warn!(entry_id = %entry_id, attempts = entry.attempts, "Releasing entry after transient failure");
            ctx.with_conn("release entry", |conn| queue::release(conn, entry_id))
                .await?;
        }
    }

    if let Err(e) = result {
        tracing::warn!(worker, job_id = %entry.job_id, error = %e, "Queue entry finished with error");
    }
    Ok(Some(outcome))
}

/// Run one worker until cancelled.
///
/// A handler already in progress is allowed to finish; cancellation is only
/// observed between entries.
pub async fn run_worker(ctx: AppContext, worker: String, cancel: CancellationToken) {
    let poll = Duration::from_secs(ctx.config.queue.poll_interval_secs.max(1));
    tracing::info!(worker = %worker, "Worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match process_next(&ctx, &worker).await {
            Ok(Some(Disposition::Acked)) => continue,
            Ok(Some(Disposition::Released)) => {
                // Back off before the released entry comes around again.
                let backoff = ctx.config.queue.retry.backoff();
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => { break; }
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::error!(worker = %worker, "Worker error: {e}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = cancel.cancelled() => { break; }
        }
    }

    tracing::info!(worker = %worker, "Worker stopped");
}

/// Spawn `queue.workers` workers.
pub fn spawn_workers(ctx: &AppContext, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    let count = ctx.config.queue.workers.max(1);
    (0..count)
        .map(|slot| tokio::spawn(run_worker(ctx.clone(), worker_id(slot), cancel.clone())))
        .collect()
}
