//! vf-storage: the remote storage tier.
//!
//! - [`store`] - the [`ObjectStore`] seam with filesystem and HTTP backends
//! - [`keys`] - deterministic local directories and remote object keys
//! - [`migrator`] - all-or-nothing upload of one artifact directory
//! - [`drm`] - client for the external DRM-hosted video service

pub mod drm;
pub mod keys;
pub mod migrator;
pub mod store;

pub use drm::{DrmClient, DrmVideoStatus, HttpDrmClient, UploadCredentials};
pub use keys::{artifact_rel_dir, object_key, remote_prefix};
pub use migrator::{delete_remote_artifact, MigrationOutcome, Migrator};
pub use store::{build_store, FsObjectStore, HttpObjectStore, ObjectStore};
