//! Asynchronous progress persistence.
//!
//! Encoder and migrator callbacks are synchronous and run on the hot path of
//! the subprocess/upload loop. [`ProgressWriter`] hands each value to a
//! background task that writes it to the job store on the blocking pool and
//! broadcasts a [`EventPayload::JobProgress`] event.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vf_core::events::EventPayload;
use vf_core::{JobId, JobStatus};

use crate::context::AppContext;

pub(crate) struct ProgressWriter {
    tx: mpsc::UnboundedSender<u8>,
    handle: JoinHandle<()>,
}

impl ProgressWriter {
    /// Spawn the writer for `job_id`; every value is written with `status`.
    pub(crate) fn spawn(ctx: &AppContext, job_id: JobId, status: JobStatus) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let ctx = ctx.clone();

        let handle = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                let pool = ctx.db.clone();
                let policy = ctx.config.queue.retry;
                let written = tokio::task::spawn_blocking(move || {
                    vf_core::retry::retry_transient_blocking(&policy, "progress write", || {
                        let conn = vf_db::pool::get_conn(&pool)?;
                        vf_db::queries::jobs::set_status(&conn, job_id, status, progress, None)
                    })
                })
                .await;

                match written {
                    Ok(Ok(job)) => ctx.emit(EventPayload::JobProgress {
                        job_id,
                        status: job.status,
                        progress: job.progress,
                    }),
                    Ok(Err(e)) => {
                        tracing::warn!(job_id = %job_id, progress, error = %e, "Failed to record progress")
                    }
                    Err(e) => tracing::warn!(job_id = %job_id, "Progress writer task panicked: {e}"),
                }
            }
        });

        Self { tx, handle }
    }

    /// Queue a progress value. Never blocks.
    pub(crate) fn report(&self, progress: u8) {
        if self.tx.send(progress).is_err() {
            tracing::debug!(progress, "Progress writer already stopped");
        }
    }

    /// Wait until every queued value has been written.
    pub(crate) async fn finish(self) {
        let Self { tx, handle } = self;
        drop(tx);
        if let Err(e) = handle.await {
            tracing::warn!("Progress writer task failed: {e}");
        }
    }
}
