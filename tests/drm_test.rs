//! DRM-hosted videos through the service layer: credentials, status and
//! release of the hosted video on delete.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::TestHarness;

use vf_core::{Error, JobId, Result};
use vf_db::pool::DbPool;
use vf_db::queries::jobs;
use vf_storage::{DrmClient, DrmVideoStatus, UploadCredentials};
use vf_worker::service;

/// Records every call; `delete_video` also notes whether the job row was
/// still present when it ran.
struct RecordingDrm {
    db: DbPool,
    job_id: Mutex<Option<JobId>>,
    calls: Mutex<Vec<String>>,
    row_present_on_delete: Mutex<Vec<bool>>,
    delete_failures: AtomicUsize,
    transient: bool,
}

impl RecordingDrm {
    fn new(db: DbPool) -> Arc<Self> {
        Self::failing(db, 0, false)
    }

    fn failing(db: DbPool, delete_failures: usize, transient: bool) -> Arc<Self> {
        Arc::new(Self {
            db,
            job_id: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            row_present_on_delete: Mutex::new(Vec::new()),
            delete_failures: AtomicUsize::new(delete_failures),
            transient,
        })
    }

    fn watch(&self, job_id: JobId) {
        *self.job_id.lock().unwrap() = Some(job_id);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DrmClient for RecordingDrm {
    async fn issue_upload_credentials(&self, title: &str) -> Result<UploadCredentials> {
        self.calls.lock().unwrap().push(format!("credentials:{title}"));
        Ok(UploadCredentials {
            video_id: "vid-123".to_string(),
            upload_url: "https://upload.example.test/vid-123".to_string(),
            expires_at: None,
        })
    }

    async fn video_status(&self, video_id: &str) -> Result<DrmVideoStatus> {
        self.calls.lock().unwrap().push(format!("status:{video_id}"));
        Ok(DrmVideoStatus {
            video_id: video_id.to_string(),
            status: "ready".to_string(),
        })
    }

    async fn delete_video(&self, video_id: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("delete:{video_id}"));
        if let Some(job_id) = *self.job_id.lock().unwrap() {
            let conn = self.db.get().unwrap();
            let present = jobs::get_job(&conn, job_id).unwrap().is_some();
            self.row_present_on_delete.lock().unwrap().push(present);
        }

        let remaining = self.delete_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.delete_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::drm("provider unavailable", self.transient));
        }
        Ok(())
    }
}

#[tokio::test]
async fn upload_credentials_are_recorded_on_the_job() {
    let h = TestHarness::new();
    let drm = RecordingDrm::new(h.ctx.db.clone());
    let ctx = h.ctx.clone().with_drm(drm.clone());
    let job = h.completed_local_job("optics", 1);

    let creds = service::request_drm_upload(&ctx, job.id).await.unwrap();
    assert_eq!(creds.video_id, "vid-123");
    assert_eq!(h.job(job.id).drm_video_id.as_deref(), Some("vid-123"));

    let status = service::drm_status(&ctx, job.id).await.unwrap();
    assert!(status.is_ready());
    assert_eq!(drm.calls(), ["credentials:optics", "status:vid-123"]);
}

#[tokio::test]
async fn drm_operations_require_a_provider() {
    let h = TestHarness::new();
    let job = h.completed_local_job("optics", 1);
    assert!(h.ctx.drm.is_none());

    let err = service::request_drm_upload(&h.ctx, job.id).await.unwrap_err();
    assert_matches!(err, Error::Validation(_));
    let err = service::drm_status(&h.ctx, job.id).await.unwrap_err();
    assert_matches!(err, Error::Validation(_));
}

#[tokio::test]
async fn status_without_hosted_video_is_not_found() {
    let h = TestHarness::new();
    let ctx = h.ctx.clone().with_drm(RecordingDrm::new(h.ctx.db.clone()));
    let job = h.completed_local_job("optics", 1);

    let err = service::drm_status(&ctx, job.id).await.unwrap_err();
    assert_matches!(err, Error::NotFound { .. });
}

#[tokio::test]
async fn delete_releases_hosted_video_before_the_row() {
    let h = TestHarness::new();
    let drm = RecordingDrm::new(h.ctx.db.clone());
    let ctx = h.ctx.clone().with_drm(drm.clone());
    let job = h.completed_local_job("optics", 2);
    jobs::set_drm_video_id(&h.conn(), job.id, Some("vid-123")).unwrap();
    drm.watch(job.id);

    service::delete_job(&ctx, job.id).await.unwrap();

    assert_eq!(drm.calls(), ["delete:vid-123"]);
    assert_eq!(*drm.row_present_on_delete.lock().unwrap(), [true]);
    assert!(jobs::get_job(&h.conn(), job.id).unwrap().is_none());
}

#[tokio::test]
async fn failed_drm_delete_keeps_the_job() {
    let h = TestHarness::new();
    let drm = RecordingDrm::failing(h.ctx.db.clone(), 1, false);
    let ctx = h.ctx.clone().with_drm(drm.clone());
    let job = h.completed_local_job("optics", 2);
    let manifest = job.artifact_path.clone().unwrap();
    jobs::set_drm_video_id(&h.conn(), job.id, Some("vid-123")).unwrap();

    let err = service::delete_job(&ctx, job.id).await.unwrap_err();
    assert_matches!(err, Error::Drm { .. });

    let kept = h.job(job.id);
    assert_eq!(kept.drm_video_id.as_deref(), Some("vid-123"));
    assert!(Path::new(&manifest).is_file(), "local artifacts survive a failed delete");

    // The operator can retry once the provider recovers.
    service::delete_job(&ctx, job.id).await.unwrap();
    assert_eq!(drm.calls(), ["delete:vid-123", "delete:vid-123"]);
    assert!(jobs::get_job(&h.conn(), job.id).unwrap().is_none());
}

#[tokio::test]
async fn transient_drm_delete_failure_is_retried() {
    let h = TestHarness::new();
    let drm = RecordingDrm::failing(h.ctx.db.clone(), 1, true);
    let ctx = h.ctx.clone().with_drm(drm.clone());
    let job = h.completed_local_job("optics", 1);
    jobs::set_drm_video_id(&h.conn(), job.id, Some("vid-123")).unwrap();

    service::delete_job(&ctx, job.id).await.unwrap();
    assert_eq!(drm.calls().len(), 2);
    assert!(jobs::get_job(&h.conn(), job.id).unwrap().is_none());
}
