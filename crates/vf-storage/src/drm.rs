//! Client for the DRM-hosted video service.
//!
//! Some uploads bypass the HLS pipeline and are hosted by an external DRM
//! provider. The pipeline never transcodes through it; it only issues
//! upload credentials, polls status and deletes videos when their job is
//! deleted.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use vf_core::config::DrmConfig;
use vf_core::{Error, Result};

/// Credentials the uploader uses to push a file straight to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadCredentials {
    pub video_id: String,
    pub upload_url: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Processing state reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrmVideoStatus {
    pub video_id: String,
    pub status: String,
}

impl DrmVideoStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self.status.as_str(), "ready" | "playable" | "completed")
    }
}

/// Operations the pipeline needs from the DRM provider.
#[async_trait]
pub trait DrmClient: Send + Sync {
    async fn issue_upload_credentials(&self, title: &str) -> Result<UploadCredentials>;

    async fn video_status(&self, video_id: &str) -> Result<DrmVideoStatus>;

    /// Delete a hosted video. A video the provider no longer knows is
    /// treated as deleted.
    async fn delete_video(&self, video_id: &str) -> Result<()>;
}

/// HTTP implementation of [`DrmClient`].
#[derive(Debug, Clone)]
pub struct HttpDrmClient {
    client: Client,
    base_url: String,
    api_secret: Option<String>,
}

impl HttpDrmClient {
    pub fn new(base_url: &str, api_secret: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build DRM HTTP client: {e}");
                Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_secret,
        }
    }

    /// Build a client when DRM is enabled and configured.
    pub fn from_config(config: &DrmConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        if config.base_url.trim().is_empty() {
            tracing::warn!("DRM enabled without base_url; DRM calls are disabled");
            return None;
        }
        Some(Self::new(
            &config.base_url,
            config.api_secret.clone(),
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_secret {
            Some(secret) => req.header("Authorization", format!("Apisecret {secret}")),
            None => req,
        }
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::drm(e.to_string(), e.is_timeout() || e.is_connect())
}

async fn status_error(resp: reqwest::Response) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
    Error::drm(format!("HTTP {status}: {}", body.trim()), transient)
}

#[async_trait]
impl DrmClient for HttpDrmClient {
    async fn issue_upload_credentials(&self, title: &str) -> Result<UploadCredentials> {
        let resp = self
            .request(reqwest::Method::POST, "/videos/credentials")
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        resp.json::<UploadCredentials>()
            .await
            .map_err(|e| Error::drm(format!("invalid credentials response: {e}"), false))
    }

    async fn video_status(&self, video_id: &str) -> Result<DrmVideoStatus> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/videos/{video_id}"))
            .send()
            .await
            .map_err(transport_error)?;
        match resp.status() {
            s if s.is_success() => resp
                .json::<DrmVideoStatus>()
                .await
                .map_err(|e| Error::drm(format!("invalid status response: {e}"), false)),
            StatusCode::NOT_FOUND => Err(Error::not_found("drm video", video_id)),
            _ => Err(status_error(resp).await),
        }
    }

    async fn delete_video(&self, video_id: &str) -> Result<()> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/videos/{video_id}"))
            .send()
            .await
            .map_err(transport_error)?;
        match resp.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => {
                tracing::info!(video_id, "Deleted DRM video");
                Ok(())
            }
            _ => Err(status_error(resp).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpDrmClient {
        HttpDrmClient::new(&server.uri(), Some("k3y".into()), Duration::from_secs(5))
    }

    #[test]
    fn from_config_requires_enabled_and_url() {
        assert!(HttpDrmClient::from_config(&DrmConfig::default()).is_none());
        let cfg = DrmConfig {
            enabled: true,
            ..DrmConfig::default()
        };
        assert!(HttpDrmClient::from_config(&cfg).is_none());
        let cfg = DrmConfig {
            enabled: true,
            base_url: "https://drm.example.com/api/".into(),
            ..DrmConfig::default()
        };
        assert_eq!(
            HttpDrmClient::from_config(&cfg).unwrap().base_url,
            "https://drm.example.com/api"
        );
    }

    #[tokio::test]
    async fn issues_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos/credentials"))
            .and(header("authorization", "Apisecret k3y"))
            .and(body_json(serde_json::json!({ "title": "Lecture 1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "video_id": "v-42",
                "upload_url": "https://upload.example.com/v-42"
            })))
            .mount(&server)
            .await;

        let creds = client(&server).issue_upload_credentials("Lecture 1").await.unwrap();
        assert_eq!(creds.video_id, "v-42");
        assert_eq!(creds.expires_at, None);
    }

    #[tokio::test]
    async fn status_and_missing_video() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/v-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "video_id": "v-1",
                "status": "ready"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/videos/v-2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let c = client(&server);
        assert!(c.video_status("v-1").await.unwrap().is_ready());
        assert!(matches!(
            c.video_status("v-2").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_tolerates_missing_and_flags_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/videos/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/videos/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let c = client(&server);
        c.delete_video("gone").await.unwrap();
        let err = c.delete_video("flaky").await.unwrap_err();
        assert!(err.is_transient());
    }
}
