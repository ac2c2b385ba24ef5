//! Remote object stores.
//!
//! The [`ObjectStore`] trait is the seam between the migrator and whatever
//! holds long-term artifacts. Two backends ship: [`FsObjectStore`] for a
//! mounted filesystem and [`HttpObjectStore`] for an HTTP bucket that
//! accepts `PUT`/`GET`/`HEAD`/`DELETE` on object URLs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use vf_core::config::{RemoteConfig, RemoteKind};
use vf_core::{Error, Result};

use crate::keys::check_key;

/// Long-term storage for migrated artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Upload the file at `path` under `key`, replacing any existing object.
    async fn put_file(&self, key: &str, path: &Path) -> Result<()>;

    /// Fetch an object as UTF-8 text.
    async fn get_text(&self, key: &str) -> Result<String>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Construct the configured store, or `None` when the remote tier is
/// disabled.
pub fn build_store(config: &RemoteConfig) -> Result<Option<Arc<dyn ObjectStore>>> {
    match config.kind {
        RemoteKind::Disabled => Ok(None),
        RemoteKind::Fs => {
            let root = config.root.clone().ok_or_else(|| {
                Error::Validation("remote.root is required for the fs store".into())
            })?;
            Ok(Some(Arc::new(FsObjectStore::new(root))))
        }
        RemoteKind::Http => Ok(Some(Arc::new(HttpObjectStore::from_config(config)?))),
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Object store backed by a directory (typically a network mount).
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_storage_error(key: &str, e: std::io::Error) -> Error {
    use std::io::ErrorKind;
    let transient = matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock
    );
    Error::storage(key, e.to_string(), transient)
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_storage_error(key, e))?;
        }
        let mut tmp_name = dest.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".part");
        let tmp = dest.with_file_name(tmp_name);

        tokio::fs::copy(path, &tmp)
            .await
            .map_err(|e| io_storage_error(key, e))?;
        tokio::fs::rename(&tmp, &dest)
            .await
            .map_err(|e| io_storage_error(key, e))?;
        Ok(())
    }

    async fn get_text(&self, key: &str) -> Result<String> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("object", key))
            }
            Err(e) => Err(io_storage_error(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_storage_error(key, e)),
        }
        // Drop now-empty parent directories up to the store root.
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == self.root.as_path() || tokio::fs::remove_dir(d).await.is_err() {
                break;
            }
            dir = d.parent();
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_storage_error(key, e))
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Object store speaking plain HTTP verbs against
/// `<endpoint>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, bucket: &str, access_token: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build object store HTTP client: {e}");
                Client::new()
            });
        let endpoint = endpoint.trim_end_matches('/');
        let bucket = bucket.trim_matches('/');
        let base_url = if bucket.is_empty() {
            endpoint.to_string()
        } else {
            format!("{endpoint}/{bucket}")
        };
        Self {
            client,
            base_url,
            access_token,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| Error::Validation("remote.endpoint is required for the http store".into()))?;
        Ok(Self::new(
            endpoint,
            &config.bucket,
            config.access_token.clone(),
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    fn url(&self, key: &str) -> Result<String> {
        check_key(key)?;
        Ok(format!("{}/{}", self.base_url, key))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// Connection failures, timeouts, 5xx and 429 are worth retrying.
fn http_error(key: &str, e: reqwest::Error) -> Error {
    let transient = e.is_timeout()
        || e.is_connect()
        || e.status().is_some_and(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS);
    Error::storage(key, e.to_string(), transient)
}

fn status_error(key: &str, status: StatusCode, body: &str) -> Error {
    let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
    Error::storage(key, format!("HTTP {status}: {}", body.trim()), transient)
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let url = self.url(key)?;
        let body = tokio::fs::read(path).await?;
        let resp = self
            .request(reqwest::Method::PUT, &url)
            .body(body)
            .send()
            .await
            .map_err(|e| http_error(key, e))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(status_error(key, status, &body))
        }
    }

    async fn get_text(&self, key: &str) -> Result<String> {
        let url = self.url(key)?;
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| http_error(key, e))?;
        match resp.status() {
            s if s.is_success() => resp.text().await.map_err(|e| http_error(key, e)),
            StatusCode::NOT_FOUND => Err(Error::not_found("object", key)),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(status_error(key, status, &body))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.url(key)?;
        let resp = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| http_error(key, e))?;
        match resp.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(status_error(key, status, &body))
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let url = self.url(key)?;
        let resp = self
            .request(reqwest::Method::HEAD, &url)
            .send()
            .await
            .map_err(|e| http_error(key, e))?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(status_error(key, status, "")),
        }
    }
}
