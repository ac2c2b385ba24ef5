//! Local-to-remote artifact migration.
//!
//! [`Migrator::migrate_dir`] uploads every file of one artifact directory.
//! It either uploads all of them or, on any failure, removes what it already
//! uploaded and reports how many files failed. Rewriting the job pointer and
//! deleting the local tree is the caller's job, after this returns `Ok`.

use std::path::{Path, PathBuf};

use vf_core::{Error, Result, RetryPolicy};
use vf_media::{parse_media_playlist, MANIFEST_NAME};
use walkdir::WalkDir;

use crate::keys::{key_dir, object_key};
use crate::store::ObjectStore;

/// Outcome of a successful migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Key prefix all files were uploaded under.
    pub remote_prefix: String,
    /// Key of the uploaded manifest; the job's new artifact pointer.
    pub manifest_key: String,
    /// Number of files uploaded.
    pub uploaded: usize,
}

/// Uploads artifact directories to an [`ObjectStore`].
pub struct Migrator<'a> {
    store: &'a dyn ObjectStore,
    retry: RetryPolicy,
    progress_every: usize,
}

/// Files under `dir` as `(relative key, absolute path)`, sorted by key.
pub fn artifact_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::from(std::io::Error::from(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        // Leftovers from an interrupted atomic write.
        if key.ends_with(".tmp") {
            continue;
        }
        files.push((key, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

impl<'a> Migrator<'a> {
    pub fn new(store: &'a dyn ObjectStore, retry: RetryPolicy, progress_every: usize) -> Self {
        Self {
            store,
            retry,
            progress_every: progress_every.max(1),
        }
    }

    /// Upload every file in `local_dir` under `remote_prefix`.
    ///
    /// `on_progress(uploaded, total)` fires every `progress_every` files and
    /// after the last one. Each upload is retried per the [`RetryPolicy`]
    /// when the failure is transient.
    ///
    /// # Errors
    ///
    /// [`Error::Migration`] when any upload fails; every object uploaded
    /// by this call has been deleted again (best effort) and local files are
    /// untouched.
    pub async fn migrate_dir(
        &self,
        local_dir: &Path,
        remote_prefix: &str,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<MigrationOutcome> {
        if !local_dir.join(MANIFEST_NAME).is_file() {
            return Err(Error::Validation(format!(
                "no {MANIFEST_NAME} in {}",
                local_dir.display()
            )));
        }

        let files = artifact_files(local_dir)?;
        let total = files.len();
        tracing::info!(
            dir = %local_dir.display(),
            prefix = remote_prefix,
            store = self.store.name(),
            total,
            "Migrating artifact directory"
        );

        let mut uploaded: Vec<String> = Vec::with_capacity(total);
        let mut failed = 0usize;
        let mut first_error: Option<String> = None;

        for (i, (rel, path)) in files.iter().enumerate() {
            let key = object_key(remote_prefix, rel);
            let store = self.store;
            let key_ref = key.as_str();
            let result = vf_core::retry::retry_transient(&self.retry, "object upload", move || {
                store.put_file(key_ref, path)
            })
            .await;

            match result {
                Ok(()) => uploaded.push(key),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Upload failed");
                    failed += 1;
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }

            let done = i + 1;
            if done % self.progress_every == 0 || done == total {
                on_progress(uploaded.len(), total);
            }
        }

        if failed > 0 {
            self.rollback(&uploaded).await;
            return Err(Error::Migration {
                failed,
                total,
                message: first_error.unwrap_or_default(),
            });
        }

        Ok(MigrationOutcome {
            remote_prefix: remote_prefix.to_string(),
            manifest_key: object_key(remote_prefix, MANIFEST_NAME),
            uploaded: uploaded.len(),
        })
    }

    async fn rollback(&self, keys: &[String]) {
        let mut left_behind = 0usize;
        for key in keys {
            if let Err(e) = self.store.delete(key).await {
                left_behind += 1;
                tracing::warn!(key = %key, error = %e, "Failed to remove uploaded object during rollback");
            }
        }
        tracing::info!(removed = keys.len() - left_behind, left_behind, "Rolled back partial migration");
    }
}

/// Delete a migrated artifact: every segment the remote manifest references,
/// then the manifest itself. Returns the number of objects deleted.
pub async fn delete_remote_artifact(store: &dyn ObjectStore, manifest_key: &str) -> Result<usize> {
    let dir = key_dir(manifest_key);
    let mut deleted = 0usize;

    match store.get_text(manifest_key).await {
        Ok(text) => {
            if let Ok(playlist) = parse_media_playlist(&text) {
                for segment in &playlist.segments {
                    let uri = segment.uri.split(['?', '#']).next().unwrap_or(&segment.uri);
                    if uri.contains("://") {
                        continue;
                    }
                    store.delete(&object_key(dir, uri)).await?;
                    deleted += 1;
                }
            }
        }
        Err(Error::NotFound { .. }) => {
            tracing::debug!(key = manifest_key, "Remote manifest already gone");
        }
        Err(e) => return Err(e),
    }

    store.delete(manifest_key).await?;
    Ok(deleted + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsObjectStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn artifact_dir(segments: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:10\n");
        for i in 0..segments {
            let name = format!("segment_{i:03}.ts");
            std::fs::write(dir.path().join(&name), b"ts").unwrap();
            manifest.push_str(&format!("#EXTINF:10.0,\n{name}\n"));
        }
        manifest.push_str("#EXT-X-ENDLIST\n");
        std::fs::write(dir.path().join("output.m3u8"), manifest).unwrap();
        dir
    }

    /// Store that fails the n-th `put_file` call (1-based) permanently and
    /// records everything else.
    struct FailingStore {
        fail_on: usize,
        calls: AtomicUsize,
        objects: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl FailingStore {
        fn new(fail_on: usize) -> Self {
            Self {
                fail_on,
                calls: AtomicUsize::new(0),
                objects: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for FailingStore {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn put_file(&self, key: &str, _path: &Path) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_on {
                return Err(Error::storage(key, "disk quota exceeded", false));
            }
            self.objects.lock().push(key.to_string());
            Ok(())
        }
        async fn get_text(&self, key: &str) -> Result<String> {
            Err(Error::not_found("object", key))
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.objects.lock().retain(|k| k != key);
            self.deleted.lock().push(key.to_string());
            Ok(())
        }
        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.objects.lock().iter().any(|k| k == key))
        }
    }

    #[test]
    fn files_are_sorted_and_relative() {
        let dir = artifact_dir(3);
        std::fs::write(dir.path().join("output.m3u8.tmp"), "x").unwrap();
        let keys: Vec<String> = artifact_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            ["output.m3u8", "segment_000.ts", "segment_001.ts", "segment_002.ts"]
        );
    }

    #[tokio::test]
    async fn migrates_everything_to_fs_store() {
        let dir = artifact_dir(20);
        let remote = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(remote.path());
        let migrator = Migrator::new(&store, RetryPolicy::none(), 10);

        let mut progress = Vec::new();
        let outcome = migrator
            .migrate_dir(dir.path(), "hls/PHY/2024/05/abc", |u, t| progress.push((u, t)))
            .await
            .unwrap();

        assert_eq!(outcome.uploaded, 21);
        assert_eq!(outcome.manifest_key, "hls/PHY/2024/05/abc/output.m3u8");
        assert_eq!(progress, [(10, 21), (20, 21), (21, 21)]);
        assert!(remote.path().join("hls/PHY/2024/05/abc/segment_019.ts").is_file());
        // local files stay; the caller removes them after the pointer rewrite
        assert!(dir.path().join("segment_019.ts").is_file());
    }

    #[tokio::test]
    async fn failure_on_fifteenth_upload_rolls_back() {
        let dir = artifact_dir(20);
        let store = FailingStore::new(15);
        let migrator = Migrator::new(&store, RetryPolicy::none(), 10);

        let err = migrator
            .migrate_dir(dir.path(), "hls/x", |_, _| {})
            .await
            .unwrap_err();

        match &err {
            Error::Migration { failed, total, .. } => {
                assert_eq!((*failed, *total), (1, 21));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("1 of 21 uploads failed"), "{err}");
        // all 20 successful uploads were attempted and then removed
        assert_eq!(store.calls.load(Ordering::SeqCst), 21);
        assert!(store.objects.lock().is_empty());
        assert_eq!(store.deleted.lock().len(), 20);
        assert_eq!(artifact_files(dir.path()).unwrap().len(), 21);
    }

    #[tokio::test]
    async fn missing_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FailingStore::new(0);
        let migrator = Migrator::new(&store, RetryPolicy::none(), 10);
        assert!(matches!(
            migrator.migrate_dir(dir.path(), "p", |_, _| {}).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn delete_remote_artifact_removes_segments_and_manifest() {
        let dir = artifact_dir(3);
        let remote = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(remote.path());
        Migrator::new(&store, RetryPolicy::none(), 10)
            .migrate_dir(dir.path(), "hls/a", |_, _| {})
            .await
            .unwrap();

        let n = delete_remote_artifact(&store, "hls/a/output.m3u8").await.unwrap();
        assert_eq!(n, 4);
        assert!(!remote.path().join("hls").exists());
        // already gone is fine
        assert_eq!(delete_remote_artifact(&store, "hls/a/output.m3u8").await.unwrap(), 1);
    }
}
