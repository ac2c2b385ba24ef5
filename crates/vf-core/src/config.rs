//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for storage, encoding, the task queue, the remote tier, etc.
//! Every section defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub uploads: UploadConfig,
    pub encoder: EncoderConfig,
    pub queue: QueueConfig,
    pub remote: RemoteConfig,
    pub drm: DrmConfig,
    pub reconcile: ReconcileConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.queue.workers == 0 {
            warnings.push("queue.workers is 0; no jobs will ever be processed".into());
        }
        if self.queue.capacity == 0 {
            warnings.push("queue.capacity is 0; every enqueue will be rejected".into());
        }
        if self.queue.lease_secs <= self.encoder.hard_timeout_secs {
            warnings.push(format!(
                "queue.lease_secs ({}) should exceed encoder.hard_timeout_secs ({}) or running conversions get redelivered",
                self.queue.lease_secs, self.encoder.hard_timeout_secs
            ));
        }
        if self.encoder.soft_timeout_secs >= self.encoder.hard_timeout_secs {
            warnings.push("encoder.soft_timeout_secs should be below hard_timeout_secs".into());
        }
        if self.encoder.progress_step == 0 || self.encoder.progress_step > 100 {
            warnings.push("encoder.progress_step must be between 1 and 100".into());
        }

        match self.remote.kind {
            RemoteKind::Http => {
                if self.remote.endpoint.as_deref().map_or(true, str::is_empty) {
                    warnings.push("remote.kind is http but remote.endpoint is empty".into());
                }
                if self.remote.bucket.is_empty() {
                    warnings.push("remote.bucket is empty".into());
                }
            }
            RemoteKind::Fs => {
                if self.remote.root.is_none() {
                    warnings.push("remote.kind is fs but remote.root is not set".into());
                }
            }
            RemoteKind::Disabled => {
                if self.queue.auto_migrate {
                    warnings.push("queue.auto_migrate is set but remote.kind is disabled".into());
                }
            }
        }

        if self.drm.enabled && self.drm.base_url.is_empty() {
            warnings.push("drm is enabled but drm.base_url is empty".into());
        }

        if self.uploads.allowed_extensions.is_empty() {
            warnings.push("uploads.allowed_extensions is empty; every upload is rejected".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// SQLite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/data/vodforge.db"),
        }
    }
}

/// Local (fast tier) storage layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the local tier. HLS output lives under `<root>/hls`.
    pub root: PathBuf,
    /// Where accepted uploads wait for conversion.
    pub uploads_dir: PathBuf,
    /// Remove the original upload once the pipeline fully succeeds.
    pub delete_source_on_success: bool,
}

impl StorageConfig {
    /// `<root>/hls`, the base of every local artifact directory.
    pub fn hls_root(&self) -> PathBuf {
        self.root.join("hls")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/data/media"),
            uploads_dir: PathBuf::from("/data/media/uploads"),
            delete_source_on_success: false,
        }
    }
}

/// Upload acceptance limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024 * 1024,
            allowed_extensions: ["mp4", "mov", "mkv", "webm", "avi", "m4v"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// The fixed HLS encoding profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub max_height: u32,
    pub video_bitrate: String,
    pub video_maxrate: String,
    pub video_bufsize: String,
    pub audio_bitrate: String,
    pub h264_profile: String,
    pub h264_level: String,
    pub preset: String,
    pub segment_seconds: u32,
    /// Ask ffmpeg to stop gracefully after this many seconds.
    pub soft_timeout_secs: u64,
    /// Kill ffmpeg after this many seconds.
    pub hard_timeout_secs: u64,
    /// Minimum progress advance (percentage points) between writes.
    pub progress_step: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_height: 720,
            video_bitrate: "1500k".into(),
            video_maxrate: "1800k".into(),
            video_bufsize: "3000k".into(),
            audio_bitrate: "128k".into(),
            h264_profile: "baseline".into(),
            h264_level: "3.1".into(),
            preset: "veryfast".into(),
            segment_seconds: 10,
            soft_timeout_secs: 58 * 60,
            hard_timeout_secs: 65 * 60,
            progress_step: 5,
        }
    }
}

/// Durable task queue and worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of waiting + claimed entries.
    pub capacity: u32,
    /// Number of workers pulling from the queue.
    pub workers: usize,
    /// A claim older than this is considered abandoned and redelivered.
    pub lease_secs: u64,
    pub poll_interval_secs: u64,
    /// Enqueue a migration as soon as a conversion completes.
    pub auto_migrate: bool,
    /// Retry policy for transient queue/connectivity failures.
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            workers: 2,
            lease_secs: 90 * 60,
            poll_interval_secs: 2,
            auto_migrate: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Backend for the remote (long-term) tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// No remote tier; migrations fail with a validation error.
    #[default]
    Disabled,
    /// A mounted filesystem (NFS, SMB, bucket fuse mount).
    Fs,
    /// An HTTP object store accepting `PUT`/`DELETE`/`HEAD` on object URLs.
    Http,
}

/// Remote object store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub kind: RemoteKind,
    pub endpoint: Option<String>,
    pub bucket: String,
    pub access_token: Option<String>,
    /// Root directory for [`RemoteKind::Fs`].
    pub root: Option<PathBuf>,
    /// First key component of every uploaded object.
    pub key_prefix: String,
    pub request_timeout_secs: u64,
    /// Report migration progress after this many uploaded files.
    pub progress_every: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: RemoteKind::Disabled,
            endpoint: None,
            bucket: "vodforge".into(),
            access_token: None,
            root: None,
            key_prefix: "hls".into(),
            request_timeout_secs: 120,
            progress_every: 10,
        }
    }
}

/// DRM-hosted video collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_secret: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for DrmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_secret: None,
            request_timeout_secs: 30,
        }
    }
}

/// Path reconciler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Temporary sources younger than this are never deleted.
    pub source_grace_hours: u64,
    /// Interval between background sweeps; 0 disables the sweep.
    pub sweep_interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            source_grace_hours: 24,
            sweep_interval_secs: 3600,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}
