//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which creates a file-backed DB and storage
//! directories inside a temp dir, a test-friendly config (fast retries, the
//! filesystem remote tier) and a full [`AppContext`].

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use vf_core::config::{Config, RemoteKind};
use vf_core::{Error, JobStatus, Result, RetryPolicy, StorageTier};
use vf_db::models::Job;
use vf_db::pool::{init_pool, PooledConnection};
use vf_db::queries::jobs;
use vf_storage::{FsObjectStore, ObjectStore};
use vf_worker::AppContext;

pub const CATEGORY: &str = "PHY";

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Build a harness, letting the test adjust the config first.
    pub fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root = dir.path();

        let mut config = Config::default();
        config.database.path = root.join("vodforge.db");
        config.storage.root = root.join("media");
        config.storage.uploads_dir = root.join("media/uploads");
        config.remote.kind = RemoteKind::Fs;
        config.remote.root = Some(root.join("remote"));
        config.queue.retry = RetryPolicy {
            max_retries: 2,
            backoff_ms: 1,
        };
        config.reconcile.sweep_interval_secs = 0;
        customize(&mut config);

        std::fs::create_dir_all(config.storage.hls_root()).expect("failed to create hls root");
        std::fs::create_dir_all(&config.storage.uploads_dir).expect("failed to create uploads");

        let db = init_pool(&config.database.path).expect("failed to create pool");
        let ctx = AppContext::new(config, db).expect("failed to build context");
        Self { ctx, dir }
    }

    pub fn conn(&self) -> PooledConnection {
        vf_db::pool::get_conn(&self.ctx.db).expect("failed to get connection")
    }

    pub fn remote_root(&self) -> PathBuf {
        self.dir.path().join("remote")
    }

    /// Write a fake source file outside the uploads directory.
    pub fn write_source(&self, name: &str) -> PathBuf {
        let incoming = self.dir.path().join("incoming");
        std::fs::create_dir_all(&incoming).unwrap();
        let path = incoming.join(name);
        std::fs::write(&path, b"not really an mp4").unwrap();
        path
    }

    pub fn job(&self, id: vf_core::JobId) -> Job {
        jobs::require_job(&self.conn(), id).unwrap()
    }

    /// Create a job that already has a ready local artifact with
    /// `segments` segments and is `completed(local)`.
    pub fn completed_local_job(&self, name: &str, segments: usize) -> Job {
        let conn = self.conn();
        let source = self.write_source(&format!("{name}.mp4"));
        let job = jobs::create_job(&conn, name, CATEGORY, Some(source.to_str().unwrap())).unwrap();
        let scoped = job.scoped_id.clone().unwrap();

        let dir = vf_worker::conversion::artifact_dir(&self.ctx, &job, &scoped);
        let manifest = write_artifact(&dir, segments);

        jobs::set_status(&conn, job.id, JobStatus::Processing, 0, None).unwrap();
        jobs::set_artifact_location(&conn, job.id, manifest.to_str().unwrap(), StorageTier::Local)
            .unwrap();
        let job = jobs::set_status(&conn, job.id, JobStatus::Processing, 100, None).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        job
    }
}

/// Write `output.m3u8` plus `segments` segment files into `dir`.
pub fn write_artifact(dir: &Path, segments: usize) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let mut manifest = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n");
    for i in 0..segments {
        let name = format!("segment_{i:03}.ts");
        std::fs::write(dir.join(&name), b"ts").unwrap();
        manifest.push_str(&format!("#EXTINF:10.000000,\n{name}\n"));
    }
    manifest.push_str("#EXT-X-ENDLIST\n");
    let path = dir.join("output.m3u8");
    std::fs::write(&path, manifest).unwrap();
    path
}

/// Number of regular files under `dir`, recursively.
pub fn count_files(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    walk(dir)
}

fn walk(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                walk(&path)
            } else {
                1
            }
        })
        .sum()
}

/// Filesystem store that fails the `fail_on`-th upload permanently.
pub struct FlakyStore {
    inner: FsObjectStore,
    fail_on: usize,
    puts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(root: impl Into<PathBuf>, fail_on: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: FsObjectStore::new(root),
            fail_on,
            puts: AtomicUsize::new(0),
        })
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(Error::storage(key, "connection reset by peer", false));
        }
        self.inner.put_file(key, path).await
    }

    async fn get_text(&self, key: &str) -> Result<String> {
        self.inner.get_text(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }
}
