//! Content repository.
//!
//! Owns the compound operations that must move more than one row (or
//! touch both the database and a storage provider) as a unit: company
//! onboarding, project expiry cascade, and active-video rotation. Simple
//! single-row CRUD stays on `Database` directly; this module exists only
//! for operations with an invariant spanning more than one write.

use chrono::Utc;
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::credentials::{CredentialStore, StaticCredentials};
use crate::data::{
    Company, Database, MarkerStatus, Notification, NotificationKind, Project, ProjectStatus, StorageConnection,
    StorageProviderKind, Video,
};
use crate::error::{AppError, Result};
use crate::storage;

/// Reserved slug for the company seeded at boot so the default storage
/// connection has something non-client to belong to.
const DEFAULT_COMPANY_SLUG: &str = "default";
/// Reserved name for the local storage connection seeded at boot.
const DEFAULT_CONNECTION_NAME: &str = "Default local storage";

pub struct ContentRepository {
    db: Arc<Database>,
    credentials: Arc<CredentialStore>,
    storage_cfg: Arc<StorageConfig>,
    public_base_url: String,
}

/// Inputs to `create_company`, mirroring the admin CRUD request body.
pub struct CreateCompanyRequest {
    pub name: String,
    pub contact_email: String,
    pub storage_connection_id: i64,
    pub storage_quota_bytes: i64,
}

impl ContentRepository {
    pub fn new(
        db: Arc<Database>,
        credentials: Arc<CredentialStore>,
        storage_cfg: Arc<StorageConfig>,
        public_base_url: String,
    ) -> Self {
        Self { db, credentials, storage_cfg, public_base_url }
    }

    fn slugify(name: &str) -> String {
        let mut slug = String::with_capacity(name.len());
        let mut last_was_dash = false;
        for ch in name.to_lowercase().chars() {
            if ch.is_ascii_alphanumeric() {
                slug.push(ch);
                last_was_dash = false;
            } else if !last_was_dash {
                slug.push('-');
                last_was_dash = true;
            }
        }
        let trimmed = slug.trim_matches('-');
        if trimmed.is_empty() {
            "company".to_string()
        } else {
            trimmed.to_string()
        }
    }

    async fn unique_slug(&self, name: &str) -> Result<String> {
        let base = Self::slugify(name);
        if !self.db.slug_exists(&base).await? {
            return Ok(base);
        }
        for suffix in 2..1000 {
            let candidate = format!("{base}-{suffix}");
            if !self.db.slug_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(AppError::Conflict(format!("could not derive a unique slug for '{name}'")))
    }

    /// `CreateCompany`. The default connection is forbidden
    /// for client companies; the row write and folder bootstrap are
    /// deliberately not in one transaction — a folder failure degrades
    /// the company instead of rejecting it.
    pub async fn create_company(&self, req: CreateCompanyRequest) -> Result<Company> {
        let connection = self
            .db
            .get_storage_connection(req.storage_connection_id)
            .await?
            .ok_or_else(|| AppError::Validation("storage_connection_id does not exist".into()))?;
        if connection.is_default {
            return Err(AppError::Validation(
                "the default storage connection may not be used for client companies".into(),
            ));
        }

        let slug = self.unique_slug(&req.name).await?;
        let now = Utc::now();
        let mut company = Company {
            id: 0,
            name: req.name,
            slug: slug.clone(),
            contact_email: req.contact_email,
            storage_connection_id: connection.id,
            storage_path: slug.clone(),
            storage_quota_bytes: req.storage_quota_bytes,
            storage_used_bytes: 0,
            subscription_tier: "free".to_string(),
            subscription_expires_at: None,
            is_active: true,
            storage_status: "ok".to_string(),
            created_at: now,
            updated_at: now,
        };
        company.id = self.db.insert_company(&company).await?;

        let degrade_reason = match storage::build_provider(
            &connection,
            &self.credentials,
            &self.storage_cfg,
            &self.public_base_url,
        ) {
            Ok(provider) => provider.bootstrap_company_folders(&slug).await.err().map(|e| e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = degrade_reason {
            self.degrade_company(&company, &reason).await?;
        }

        Ok(company)
    }

    async fn degrade_company(&self, company: &Company, reason: &str) -> Result<()> {
        self.db.update_company_storage_status(company.id, "degraded").await?;
        let notification = Notification {
            id: 0,
            company_id: company.id,
            project_id: None,
            ar_content_id: None,
            kind: NotificationKind::StorageDegraded.as_str().to_string(),
            subject: format!("Storage folders for '{}' could not be created", company.name),
            message: reason.to_string(),
            metadata_json: serde_json::json!({}).to_string(),
            created_at: Utc::now(),
        };
        self.db.insert_notification(&notification).await?;
        Ok(())
    }

    /// `ExpireProject`: flips the project to
    /// `expired`, cascades `ARContent.is_active = false` for everything
    /// under it, and appends one Notification, all inside one
    /// transaction. A no-op if the project was already expired by a
    /// concurrent tick.
    pub async fn expire_project(&self, project: &Project) -> Result<()> {
        let now = Utc::now();
        let notification = Notification {
            id: 0,
            company_id: project.company_id,
            project_id: Some(project.id),
            ar_content_id: None,
            kind: NotificationKind::Expired.as_str().to_string(),
            subject: format!("Project '{}' has expired", project.name),
            message: "The project and its AR content are no longer served to viewers.".to_string(),
            metadata_json: serde_json::json!({}).to_string(),
            created_at: now,
        };

        let transitioned = self.db.expire_project_cascade(project.id, now, &notification).await?;
        if !transitioned {
            return Ok(());
        }

        crate::metrics::EXPIRY_DEACTIVATIONS_TOTAL.with_label_values(&["ok"]).inc();
        Ok(())
    }

    /// `RotateActiveVideo`: atomically deactivate
    /// whichever video is active and activate `next_video_id`.
    pub async fn rotate_active_video(&self, ar_content_id: i64, next_video_id: i64) -> Result<()> {
        self.db.set_active_video(ar_content_id, next_video_id, Utc::now()).await
    }

    /// Admin-triggered manual activation, same invariant as rotation but
    /// outside the scheduler.
    pub async fn set_active_video(&self, ar_content_id: i64, video: &Video) -> Result<()> {
        if video.ar_content_id != ar_content_id {
            return Err(AppError::Validation("video does not belong to this content".into()));
        }
        self.db.set_active_video(ar_content_id, video.id, Utc::now()).await
    }

    /// Admin reset of a failed/ready marker back to `pending` to force
    /// regeneration; forbidden from `processing`.
    pub async fn reset_marker(&self, ar_content_id: i64) -> Result<()> {
        let content = self
            .db
            .get_ar_content(ar_content_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if content.marker_status_enum() == Some(MarkerStatus::Processing) {
            return Err(AppError::Conflict("marker generation is in progress".into()));
        }
        self.db.reset_marker_to_pending(ar_content_id).await
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Boot-time bootstrap: seed the default local storage connection and
    /// the default company if a fresh database has neither yet. Idempotent
    /// — a second call against an already-seeded database is a no-op.
    pub async fn seed_defaults(&self) -> Result<()> {
        let connection = match self.db.get_default_storage_connection().await? {
            Some(connection) => connection,
            None => {
                let now = Utc::now();
                let mut connection = StorageConnection {
                    id: 0,
                    name: DEFAULT_CONNECTION_NAME.to_string(),
                    provider: StorageProviderKind::Local.as_str().to_string(),
                    credentials_encrypted: self.credentials.encrypt_static_credentials(&StaticCredentials::default())?,
                    base_path: DEFAULT_COMPANY_SLUG.to_string(),
                    is_default: true,
                    is_active: true,
                    last_tested_at: None,
                    test_status: None,
                    test_error: None,
                    created_at: now,
                    updated_at: now,
                };
                connection.id = self.db.insert_storage_connection(&connection).await?;
                tracing::info!(connection_id = %connection.id, "seeded default local storage connection");
                connection
            }
        };

        if !self.db.slug_exists(DEFAULT_COMPANY_SLUG).await? {
            let now = Utc::now();
            let mut company = Company {
                id: 0,
                name: "Default".to_string(),
                slug: DEFAULT_COMPANY_SLUG.to_string(),
                contact_email: "admin@localhost".to_string(),
                storage_connection_id: connection.id,
                storage_path: DEFAULT_COMPANY_SLUG.to_string(),
                storage_quota_bytes: 0,
                storage_used_bytes: 0,
                subscription_tier: "internal".to_string(),
                subscription_expires_at: None,
                is_active: true,
                storage_status: "ok".to_string(),
                created_at: now,
                updated_at: now,
            };
            company.id = self.db.insert_company(&company).await?;
            tracing::info!(company_id = %company.id, "seeded default company");
        }

        Ok(())
    }
}

impl ProjectStatus {
    /// Whether this status makes a Project's content resolvable by C6.
    pub fn is_resolvable(self) -> bool {
        matches!(self, ProjectStatus::Active)
    }
}
