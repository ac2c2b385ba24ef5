//! vf-worker: the running side of vodforge.
//!
//! This crate ties the other vf-* crates together. It provides:
//!
//! - The service API used by callers: job creation, enqueueing, polling,
//!   retry and deletion ([`service`])
//! - A fixed-size worker pool over the durable queue ([`pool`])
//! - The conversion and migration stages ([`conversion`], [`migration`])
//! - The path reconciler and stale-job sweep ([`reconciler`])
//! - Graceful shutdown via signal handling

pub mod context;
pub mod conversion;
pub mod migration;
pub mod pool;
mod progress;
pub mod reconciler;
pub mod service;

pub use context::AppContext;
pub use pool::{process_next, spawn_workers, Disposition};
pub use reconciler::{reconcile_all, resolve_for_streaming, ReconcileReport};
pub use service::JobStatusView;

use tokio_util::sync::CancellationToken;

use vf_core::config::Config;

/// Start the worker service.
///
/// Opens the database, releases claims left over from a previous process,
/// then runs the worker pool and the reconciler until a shutdown signal
/// arrives. Handlers in flight are allowed to finish.
pub async fn start(config: Config) -> vf_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db_path = config.database.path.clone();
    let existed = db_path.exists();
    let db = vf_db::pool::init_pool(&db_path)?;
    if existed {
        tracing::info!("Database opened (existing) at {}", db_path.display());
    } else {
        tracing::info!("Database created (new) at {}", db_path.display());
    }

    std::fs::create_dir_all(config.storage.hls_root())?;
    std::fs::create_dir_all(&config.storage.uploads_dir)?;

    let ctx = AppContext::new(config, db)?;
    for info in ctx.tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }
    match &ctx.store {
        Some(store) => tracing::info!("Remote tier: {}", store.name()),
        None => tracing::info!("Remote tier disabled"),
    }

    // No worker of this process owns anything yet.
    let released = ctx
        .with_conn("release claims", vf_db::queries::queue::release_all_claims)
        .await?;
    if released > 0 {
        tracing::info!(released, "Released queue claims from a previous run");
    }

    let cancel = CancellationToken::new();

    let mut handles = spawn_workers(&ctx, &cancel);
    let sweep_ctx = ctx.clone();
    let sweep_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        reconciler::run_sweeps(sweep_ctx, sweep_cancel).await;
    }));
    tracing::info!(workers = ctx.config.queue.workers, "vodforge worker running");

    shutdown_signal(cancel.clone()).await;
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("Background task ended abnormally: {e}");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C, SIGTERM, or the cancellation token.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
