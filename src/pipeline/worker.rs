//! Worker pool.
//!
//! One Tokio task per configured worker slot, grouped by queue. Each task
//! loops: claim a job, dispatch on `job_kind`, ack or retry. Shutdown is
//! cooperative — a `watch::Receiver<bool>` is checked between jobs, never
//! mid-job, so an in-flight marker compile always finishes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::content::ContentRepository;
use crate::credentials::CredentialStore;
use crate::data::{Database, Job, JobKind, MarkerStatus, Notification, NotificationKind};
use crate::error::StorageError;
use crate::storage::{self, Provider};

use super::compiler::{self, CompilerError};

/// Payload for a `generate_marker` job, the only kind actually constructed
/// by this codebase today (enqueued from the ar_content upload path).
#[derive(Debug, Serialize, Deserialize)]
pub struct PipelinePayload {
    pub ar_content_id: i64,
}

pub struct WorkerPool {
    db: Arc<Database>,
    content: Arc<ContentRepository>,
    credentials: Arc<CredentialStore>,
    storage_cfg: Arc<crate::config::StorageConfig>,
    public_base_url: String,
    cfg: PipelineConfig,
}

impl WorkerPool {
    pub fn new(
        db: Arc<Database>,
        content: Arc<ContentRepository>,
        credentials: Arc<CredentialStore>,
        storage_cfg: Arc<crate::config::StorageConfig>,
        public_base_url: String,
        cfg: PipelineConfig,
    ) -> Self {
        Self { db, content, credentials, storage_cfg, public_base_url, cfg }
    }

    /// Spawn every configured worker. Returns once all spawn calls are
    /// issued; workers run until `shutdown` flips to `true`.
    pub fn spawn(self: Arc<Self>, shutdown: tokio::sync::watch::Receiver<bool>) {
        for i in 0..self.cfg.markers_workers {
            let pool = self.clone();
            let mut shutdown = shutdown.clone();
            let worker_id = format!("markers-{i}");
            tokio::spawn(async move { pool.run_loop("markers", worker_id, &mut shutdown).await });
        }
        for i in 0..self.cfg.notifications_workers {
            let pool = self.clone();
            let mut shutdown = shutdown.clone();
            let worker_id = format!("notifications-{i}");
            tokio::spawn(async move { pool.run_loop("notifications", worker_id, &mut shutdown).await });
        }
        for i in 0..self.cfg.default_queue_workers {
            let pool = self.clone();
            let mut shutdown = shutdown.clone();
            let worker_id = format!("default-{i}");
            tokio::spawn(async move { pool.run_loop("default", worker_id, &mut shutdown).await });
        }
    }

    async fn run_loop(&self, queue: &str, worker_id: String, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.db.claim_next_job(queue, &worker_id).await {
                Ok(Some(job)) => self.dispatch(job).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(StdDuration::from_millis(500)) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, queue, "job claim failed");
                    tokio::time::sleep(StdDuration::from_secs(1)).await;
                }
            }
        }
    }

    async fn dispatch(&self, job: Job) {
        let Some(kind) = JobKind::from_str(&job.job_kind) else {
            tracing::error!(job_id = %job.id, kind = %job.job_kind, "unknown job kind, failing terminally");
            let _ = self.db.fail_job_terminal(&job.id).await;
            return;
        };

        let outcome = match kind {
            JobKind::GenerateMarker => self.run_generate_marker(&job).await,
            JobKind::SendNotification => self.run_send_notification(&job).await,
            JobKind::CheckExpiringProjects => {
                tracing::warn!(job_id = %job.id, "check_expiring_projects jobs are not produced by this build; dropping");
                Ok(())
            }
            JobKind::DeactivateExpired | JobKind::RotateVideos | JobKind::RefreshTokens => {
                tracing::warn!(job_id = %job.id, kind = %job.job_kind, "periodic job kind received but has no handler here; dropping");
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.db.complete_job(&job.id).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to mark job complete");
                }
            }
            Err(JobOutcome::Retry(reason)) => {
                if job.attempt + 1 >= self.cfg.max_retries as i64 {
                    tracing::error!(job_id = %job.id, reason, "job exhausted retries");
                    if let Err(e) = self.db.fail_job_terminal(&job.id).await {
                        tracing::error!(job_id = %job.id, error = %e, "failed to mark job terminally failed");
                    }
                    self.on_exhausted(&job, &reason).await;
                } else {
                    let delay = self.backoff_delay(job.attempt);
                    tracing::warn!(job_id = %job.id, reason, attempt = job.attempt, delay_secs = delay.num_seconds(), "retrying job");
                    if let Err(e) = self.db.retry_job(&job.id, Utc::now() + delay).await {
                        tracing::error!(job_id = %job.id, error = %e, "failed to reschedule retry");
                    }
                }
            }
            Err(JobOutcome::Fatal(reason)) => {
                tracing::error!(job_id = %job.id, reason, "job failed fatally, no retry");
                if let Err(e) = self.db.fail_job_terminal(&job.id).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to mark job terminally failed");
                }
                self.on_exhausted(&job, &reason).await;
            }
        }
    }

    fn backoff_delay(&self, attempt: i64) -> Duration {
        let base = self.cfg.backoff_base_seconds as i64;
        let capped_attempt = attempt.clamp(0, 10) as u32;
        let seconds = base.saturating_mul(2i64.saturating_pow(capped_attempt));
        Duration::seconds(seconds.min(3600))
    }

    async fn on_exhausted(&self, job: &Job, reason: &str) {
        if job.job_kind != JobKind::GenerateMarker.as_str() {
            return;
        }
        let Ok(payload) = serde_json::from_str::<PipelinePayload>(&job.payload_json) else {
            return;
        };
        let Ok(Some(content)) = self.db.get_ar_content(payload.ar_content_id).await else {
            return;
        };
        let _ = self.db.update_marker_result(content.id, MarkerStatus::Failed, None, None, None).await;
        let notification = Notification {
            id: 0,
            company_id: content.company_id,
            project_id: Some(content.project_id),
            ar_content_id: Some(content.id),
            kind: NotificationKind::MarkerFailed.as_str().to_string(),
            subject: format!("Marker generation failed for '{}'", content.title),
            message: reason.to_string(),
            metadata_json: serde_json::json!({}).to_string(),
            created_at: Utc::now(),
        };
        let _ = self.db.insert_notification(&notification).await;
    }

    /// Downloads the source image, compiles a marker, uploads the
    /// result, and transitions the content's marker status.
    async fn run_generate_marker(&self, job: &Job) -> Result<(), JobOutcome> {
        let payload: PipelinePayload = serde_json::from_str(&job.payload_json)
            .map_err(|e| JobOutcome::Fatal(format!("malformed payload: {e}")))?;

        let content = self
            .db
            .get_ar_content(payload.ar_content_id)
            .await
            .map_err(|e| JobOutcome::Retry(e.to_string()))?
            .ok_or_else(|| JobOutcome::Fatal("ar_content not found".to_string()))?;

        if !matches!(content.marker_status_enum(), Some(MarkerStatus::Pending) | Some(MarkerStatus::Failed)) {
            return Ok(());
        }
        let claimed = self
            .db
            .try_claim_marker_job(content.id)
            .await
            .map_err(|e| JobOutcome::Retry(e.to_string()))?;
        if !claimed {
            return Ok(());
        }

        let company = self
            .db
            .get_company(content.company_id)
            .await
            .map_err(|e| JobOutcome::Retry(e.to_string()))?
            .ok_or_else(|| JobOutcome::Fatal("owning company not found".to_string()))?;
        let connection = self
            .db
            .get_storage_connection(company.storage_connection_id)
            .await
            .map_err(|e| JobOutcome::Retry(e.to_string()))?
            .ok_or_else(|| JobOutcome::Fatal("storage connection not found".to_string()))?;

        let provider = storage::build_provider(&connection, &self.credentials, &self.storage_cfg, &self.public_base_url)
            .map_err(|e| JobOutcome::Fatal(e.to_string()))?;

        let scratch = std::env::temp_dir().join(format!("arportal-marker-{}", content.id));
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| JobOutcome::Retry(format!("could not create scratch dir: {e}")))?;
        let result = self.compile_and_upload(content.id, &content.image_path, &company.storage_path, &provider, &scratch).await;
        let _ = tokio::fs::remove_dir_all(&scratch).await;

        match result {
            Ok((marker_path, marker_url, feature_points)) => {
                self.db
                    .update_marker_result(content.id, MarkerStatus::Ready, Some(&marker_path), Some(&marker_url), Some(feature_points))
                    .await
                    .map_err(|e| JobOutcome::Retry(e.to_string()))?;
                Ok(())
            }
            Err(outcome) => {
                // Only `on_exhausted` flips marker_status to `failed`; a
                // retriable attempt just needs the row back out of
                // `processing` so the next attempt can reclaim it.
                let _ = self.db.reset_marker_to_pending(content.id).await;
                Err(outcome)
            }
        }
    }

    async fn compile_and_upload(
        &self,
        ar_content_id: i64,
        image_key: &str,
        company_storage_path: &str,
        provider: &Provider,
        scratch: &Path,
    ) -> Result<(String, String, i64), JobOutcome> {
        let source_image = scratch.join("source");
        provider
            .download(image_key, &source_image)
            .await
            .map_err(|e| storage_outcome(e, "source image download failed"))?;

        let compiled = compiler::compile_marker(
            &self.cfg.compiler_path,
            &source_image,
            scratch,
            self.cfg.compiler_max_features,
            StdDuration::from_secs(self.cfg.compiler_timeout_seconds),
        )
        .await
        .map_err(|e| match e {
            CompilerError::SpawnFailed(msg) => JobOutcome::Fatal(format!("compiler not runnable: {msg}")),
            other => JobOutcome::Retry(other.to_string()),
        })?;

        let dest_key = format!("{company_storage_path}/markers/{ar_content_id}.mind");
        let marker_url = provider
            .upload(&compiled.artifact_path, &dest_key, "application/octet-stream")
            .await
            .map_err(|e| storage_outcome(e, "artifact upload failed"))?;

        Ok((dest_key, marker_url, compiled.feature_points))
    }

    /// `send_notification` jobs forward to an external delivery transport
    /// (email/Telegram) that is out of scope here; we only drain the
    /// queue so `queue_depth` stays accurate if something ever enqueues
    /// one.
    async fn run_send_notification(&self, job: &Job) -> Result<(), JobOutcome> {
        tracing::info!(job_id = %job.id, "send_notification job drained; external transport not wired in this build");
        Ok(())
    }
}

enum JobOutcome {
    Retry(String),
    Fatal(String),
}

/// Transient and credential-expired storage errors are retriable (a
/// background refresh may fix credentials before the next attempt);
/// not-found and permanent errors are not.
fn storage_outcome(e: StorageError, context: &str) -> JobOutcome {
    match e {
        StorageError::Transient(_) | StorageError::CredentialExpired => JobOutcome::Retry(format!("{context}: {e}")),
        StorageError::NotFound(_) | StorageError::Permanent(_) => JobOutcome::Fatal(format!("{context}: {e}")),
    }
}
