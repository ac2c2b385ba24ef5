//! Shared application context.
//!
//! [`AppContext`] is handed to every worker, the reconciler and the service
//! API. It holds the immutable infrastructure (DB pool, tools, encoder) and
//! the remote collaborators, which are built once at startup and injected as
//! trait objects.

use std::sync::Arc;

use rusqlite::Connection;

use vf_av::{HlsEncoder, ToolRegistry};
use vf_core::config::Config;
use vf_core::events::{EventBus, EventPayload};
use vf_core::{Error, Result};
use vf_db::pool::DbPool;
use vf_storage::{DrmClient, HttpDrmClient, ObjectStore};

/// Application context shared by workers and the service API.
///
/// Cheap to clone: everything is behind an `Arc` (or is a pool handle).
#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool.
    pub db: DbPool,
    /// Immutable configuration snapshot.
    pub config: Arc<Config>,
    /// Broadcast event bus for lifecycle and progress events.
    pub event_bus: Arc<EventBus>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Fixed-profile HLS encoder.
    pub encoder: Arc<HlsEncoder>,
    /// Remote object store; `None` when the remote tier is disabled.
    pub store: Option<Arc<dyn ObjectStore>>,
    /// DRM-hosted video collaborator; `None` when disabled.
    pub drm: Option<Arc<dyn DrmClient>>,
}

impl AppContext {
    /// Build the context from configuration: discovers tools and constructs
    /// the configured remote store and DRM client.
    pub fn new(config: Config, db: DbPool) -> Result<Self> {
        let tools = ToolRegistry::discover(&config.tools);
        let store = vf_storage::build_store(&config.remote)?;
        let drm = HttpDrmClient::from_config(&config.drm)
            .map(|c| Arc::new(c) as Arc<dyn DrmClient>);

        Ok(Self {
            db,
            encoder: Arc::new(HlsEncoder::new(tools.clone(), config.encoder.clone())),
            tools: Arc::new(tools),
            config: Arc::new(config),
            event_bus: Arc::new(EventBus::default()),
            store,
            drm,
        })
    }

    /// Replace the remote object store.
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the DRM client.
    pub fn with_drm(mut self, drm: Arc<dyn DrmClient>) -> Self {
        self.drm = Some(drm);
        self
    }

    /// The remote store, or a validation error when the tier is disabled.
    pub fn remote_store(&self) -> Result<&Arc<dyn ObjectStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::Validation("remote storage is disabled".into()))
    }

    /// Run `f` on a pooled connection, retrying transient failures
    /// (busy/locked database) per the queue retry policy.
    pub async fn with_conn<T>(
        &self,
        op_name: &str,
        f: impl Fn(&Connection) -> Result<T>,
    ) -> Result<T> {
        let pool = &self.db;
        let f = &f;
        vf_core::retry::retry_transient(&self.config.queue.retry, op_name, move || async move {
            let conn = vf_db::pool::get_conn(pool)?;
            f(&conn)
        })
        .await
    }

    pub fn emit(&self, payload: EventPayload) {
        self.event_bus.broadcast(payload);
    }
}
