//! vodforge: video ingest pipeline.
//!
//! Uploaded source media is transcoded into HLS, tracked through a durable
//! job state machine, and optionally migrated from local disk to a remote
//! object store. The work is split across the workspace crates:
//!
//! - [`vf_core`] - configuration, errors, ids, the job state graph, events
//! - [`vf_db`] - SQLite job store and durable task queue
//! - [`vf_media`] - manifest parsing, normalization, repair and readiness
//! - [`vf_av`] - ffmpeg discovery, process control and the segment encoder
//! - [`vf_storage`] - remote object stores, the migrator and the DRM client
//! - [`vf_worker`] - worker pool, stages, reconciler and the service API
//!
//! The [`commands`] module holds the implementations behind the `vodforge`
//! binary.

pub mod commands;

pub use vf_core::config::Config;
pub use vf_core::{Error, JobId, JobStatus, Result, StorageTier};
pub use vf_worker::AppContext;
