//! SQLite-backed relational store.
//!
//! This module owns the connection pool and every raw CRUD statement.
//! Compound, multi-row operations that must be atomic live one
//! layer up in [`crate::content::Repository`], which borrows a [`Database`]
//! and wraps the relevant statements in `BEGIN IMMEDIATE` transactions to
//! get single-writer row-level-lock semantics out of embedded SQLite.
//!
//! Every entity keys off a DB-assigned monotonic integer id: `insert_*`
//! never binds an id column and instead returns the one SQLite assigned,
//! read back via `last_insert_rowid()` on the same connection the insert
//! ran on. `jobs.id` is the one exception — see its own section below.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to the SQLite database, creating the file and running
    /// pending migrations if needed. A migration failure is fatal
    ///.
    pub async fn connect(path: &Path, pool_size: u32) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect(&connection_string)
            .await?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!(error = %e, "schema migration failed");
            AppError::Internal(anyhow::anyhow!("migration failed: {e}"))
        })?;

        tracing::info!("database connected and migrated");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // StorageConnection
    // =========================================================================

    pub async fn insert_storage_connection(&self, c: &StorageConnection) -> Result<i64, AppError> {
        let result = sqlx::query(
            "INSERT INTO storage_connections
             (name, provider, credentials_encrypted, base_path, is_default, is_active,
              last_tested_at, test_status, test_error, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&c.name)
        .bind(&c.provider)
        .bind(&c.credentials_encrypted)
        .bind(&c.base_path)
        .bind(c.is_default)
        .bind(c.is_active)
        .bind(c.last_tested_at)
        .bind(&c.test_status)
        .bind(&c.test_error)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_storage_connection(&self, id: i64) -> Result<Option<StorageConnection>, AppError> {
        let row = sqlx::query_as::<_, StorageConnection>("SELECT * FROM storage_connections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_default_storage_connection(&self) -> Result<Option<StorageConnection>, AppError> {
        let row = sqlx::query_as::<_, StorageConnection>(
            "SELECT * FROM storage_connections WHERE is_default = 1 AND provider = 'local' LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_storage_connections(&self) -> Result<Vec<StorageConnection>, AppError> {
        let rows = sqlx::query_as::<_, StorageConnection>("SELECT * FROM storage_connections ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Atomic token swap after a successful OAuth refresh.
    pub async fn update_storage_connection_credentials(
        &self,
        id: i64,
        credentials_encrypted: &str,
        when: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE storage_connections SET credentials_encrypted = ?, updated_at = ? WHERE id = ?")
            .bind(credentials_encrypted)
            .bind(when)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_storage_connection_test(
        &self,
        id: i64,
        status: &str,
        error: Option<&str>,
        tested_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE storage_connections SET test_status = ?, test_error = ?, last_tested_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(error)
        .bind(tested_at)
        .bind(tested_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Names and places a connection created inactive by the cloud-disk
    /// OAuth callback, then activates it. `name`/`base_path` are only
    /// ever assigned once, at this point.
    pub async fn update_storage_connection_details(
        &self,
        id: i64,
        name: &str,
        base_path: &str,
        is_active: bool,
        when: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE storage_connections SET name = ?, base_path = ?, is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(base_path)
        .bind(is_active)
        .bind(when)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Company
    // =========================================================================

    pub async fn insert_company(&self, c: &Company) -> Result<i64, AppError> {
        let result = sqlx::query(
            "INSERT INTO companies
             (name, slug, contact_email, storage_connection_id, storage_path,
              storage_quota_bytes, storage_used_bytes, subscription_tier,
              subscription_expires_at, is_active, storage_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&c.name)
        .bind(&c.slug)
        .bind(&c.contact_email)
        .bind(c.storage_connection_id)
        .bind(&c.storage_path)
        .bind(c.storage_quota_bytes)
        .bind(c.storage_used_bytes)
        .bind(&c.subscription_tier)
        .bind(c.subscription_expires_at)
        .bind(c.is_active)
        .bind(&c.storage_status)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_company(&self, id: i64) -> Result<Option<Company>, AppError> {
        let row = sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn slug_exists(&self, slug: &str) -> Result<bool, AppError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM companies WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn list_companies(&self) -> Result<Vec<Company>, AppError> {
        let rows = sqlx::query_as::<_, Company>("SELECT * FROM companies ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Companies pinned to a given storage connection.
    pub async fn list_companies_by_storage_connection(&self, connection_id: i64) -> Result<Vec<Company>, AppError> {
        let rows = sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE storage_connection_id = ?")
            .bind(connection_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn update_company_storage_status(&self, id: i64, status: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE companies SET storage_status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reconcile `storage_used_bytes` against a fresh usage read from the
    /// company's storage provider.
    pub async fn update_company_storage_used(&self, id: i64, used_bytes: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE companies SET storage_used_bytes = ?, updated_at = ? WHERE id = ?")
            .bind(used_bytes)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_company_active(&self, id: i64, is_active: bool) -> Result<(), AppError> {
        sqlx::query("UPDATE companies SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Project
    // =========================================================================

    pub async fn insert_project(&self, p: &Project) -> Result<i64, AppError> {
        let result = sqlx::query(
            "INSERT INTO projects
             (company_id, name, starts_at, expires_at, status,
              notify_before_expiry_days, last_notification_sent_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(p.company_id)
        .bind(&p.name)
        .bind(p.starts_at)
        .bind(p.expires_at)
        .bind(&p.status)
        .bind(p.notify_before_expiry_days)
        .bind(p.last_notification_sent_at)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_project(&self, id: i64) -> Result<Option<Project>, AppError> {
        let row = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_projects_by_company(&self, company_id: i64) -> Result<Vec<Project>, AppError> {
        let rows = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE company_id = ? ORDER BY created_at")
            .bind(company_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Candidates for the daily expiry-warning job.
    pub async fn list_projects_expiring_within(
        &self,
        now: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) -> Result<Vec<Project>, AppError> {
        let rows = sqlx::query_as::<_, Project>(
            "SELECT * FROM projects
             WHERE status = 'active' AND expires_at IS NOT NULL
               AND expires_at >= ? AND expires_at <= ?",
        )
        .bind(now)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Candidates for the minute-tick expiry-deactivation job.
    pub async fn list_expired_active_projects(&self, now: DateTime<Utc>) -> Result<Vec<Project>, AppError> {
        let rows = sqlx::query_as::<_, Project>(
            "SELECT * FROM projects WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Moves a project straight to `archived`, bypassing the usual
    /// `active -> expired` transition. Used by the admin soft-delete
    /// endpoint for projects that should stop resolving immediately
    /// without going through the expiry-warning flow.
    pub async fn archive_project(&self, id: i64, when: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE projects SET status = 'archived', updated_at = ? WHERE id = ?")
            .bind(when)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_project_notification_sent(&self, id: i64, when: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE projects SET last_notification_sent_at = ?, updated_at = ? WHERE id = ?")
            .bind(when)
            .bind(when)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomic `ExpireProject` cascade: flips the project `active ->
    /// expired`, deactivates every ARContent under it, and records the
    /// expiry notification, all inside one immediate transaction so a
    /// crash between steps can never leave the project expired with its
    /// content still serving. Returns `false` without any side effect if
    /// the project had already expired on a concurrent tick.
    pub async fn expire_project_cascade(
        &self,
        project_id: i64,
        when: DateTime<Utc>,
        notification: &Notification,
    ) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: Result<bool, AppError> = async {
            let updated = sqlx::query(
                "UPDATE projects SET status = 'expired', updated_at = ? WHERE id = ? AND status = 'active'",
            )
            .bind(when)
            .bind(project_id)
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                return Ok(false);
            }

            sqlx::query(
                "UPDATE ar_contents SET is_active = 0, updated_at = ? WHERE project_id = ? AND is_active = 1",
            )
            .bind(when)
            .bind(project_id)
            .execute(&mut *conn)
            .await?;

            sqlx::query(
                "INSERT INTO notifications
                 (company_id, project_id, ar_content_id, kind, subject, message, metadata_json, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(notification.company_id)
            .bind(notification.project_id)
            .bind(notification.ar_content_id)
            .bind(&notification.kind)
            .bind(&notification.subject)
            .bind(&notification.message)
            .bind(&notification.metadata_json)
            .bind(notification.created_at)
            .execute(&mut *conn)
            .await?;

            Ok(true)
        }
        .await;

        match result {
            Ok(transitioned) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                if transitioned {
                    crate::metrics::NOTIFICATIONS_SENT_TOTAL.with_label_values(&[&notification.kind]).inc();
                }
                Ok(transitioned)
            }
            Err(error) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(error)
            }
        }
    }

    // =========================================================================
    // ARContent
    // =========================================================================

    pub async fn insert_ar_content(&self, c: &ARContent) -> Result<i64, AppError> {
        let result = sqlx::query(
            "INSERT INTO ar_contents
             (project_id, company_id, unique_id, title, image_path, image_url,
              marker_path, marker_url, marker_status, marker_feature_points,
              is_active, active_video_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(c.project_id)
        .bind(c.company_id)
        .bind(&c.unique_id)
        .bind(&c.title)
        .bind(&c.image_path)
        .bind(&c.image_url)
        .bind(&c.marker_path)
        .bind(&c.marker_url)
        .bind(&c.marker_status)
        .bind(c.marker_feature_points)
        .bind(c.is_active)
        .bind(c.active_video_id)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_ar_content_active(&self, id: i64, is_active: bool) -> Result<(), AppError> {
        sqlx::query("UPDATE ar_contents SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_ar_content(&self, id: i64) -> Result<Option<ARContent>, AppError> {
        let row = sqlx::query_as::<_, ARContent>("SELECT * FROM ar_contents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_ar_content_by_unique_id(&self, unique_id: &str) -> Result<Option<ARContent>, AppError> {
        let row = sqlx::query_as::<_, ARContent>("SELECT * FROM ar_contents WHERE unique_id = ?")
            .bind(unique_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_ar_content_by_project(&self, project_id: i64) -> Result<Vec<ARContent>, AppError> {
        let rows = sqlx::query_as::<_, ARContent>("SELECT * FROM ar_contents WHERE project_id = ? ORDER BY created_at")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// CAS transition used by C4 step 2: only succeeds from
    /// `pending` or `failed`. Returns true if the row moved to `processing`.
    pub async fn try_claim_marker_job(&self, ar_content_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE ar_contents SET marker_status = 'processing', updated_at = ?
             WHERE id = ? AND marker_status IN ('pending', 'failed')",
        )
        .bind(Utc::now())
        .bind(ar_content_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `UpdateMarkerResult`. `ready -> *` is forbidden through
    /// this path; only `processing -> ready|failed` is allowed.
    pub async fn update_marker_result(
        &self,
        ar_content_id: i64,
        status: MarkerStatus,
        marker_path: Option<&str>,
        marker_url: Option<&str>,
        feature_points: Option<i64>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE ar_contents
             SET marker_status = ?, marker_path = ?, marker_url = ?, marker_feature_points = ?, updated_at = ?
             WHERE id = ? AND marker_status = 'processing'",
        )
        .bind(status.as_str())
        .bind(marker_path)
        .bind(marker_url)
        .bind(feature_points)
        .bind(Utc::now())
        .bind(ar_content_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn reset_marker_to_pending(&self, ar_content_id: i64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE ar_contents SET marker_status = 'pending', marker_feature_points = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(ar_content_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Video
    // =========================================================================

    pub async fn insert_video(&self, v: &Video) -> Result<i64, AppError> {
        let result = sqlx::query(
            "INSERT INTO videos
             (ar_content_id, title, video_path, video_url, duration_seconds,
              width, height, mime_type, is_active, rotation_order, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(v.ar_content_id)
        .bind(&v.title)
        .bind(&v.video_path)
        .bind(&v.video_url)
        .bind(v.duration_seconds)
        .bind(v.width)
        .bind(v.height)
        .bind(&v.mime_type)
        .bind(v.is_active)
        .bind(v.rotation_order)
        .bind(v.created_at)
        .bind(v.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_video(&self, id: i64) -> Result<Option<Video>, AppError> {
        let row = sqlx::query_as::<_, Video>("SELECT * FROM videos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_videos_by_ar_content(&self, ar_content_id: i64) -> Result<Vec<Video>, AppError> {
        let rows = sqlx::query_as::<_, Video>(
            "SELECT * FROM videos WHERE ar_content_id = ? ORDER BY rotation_order",
        )
        .bind(ar_content_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// `RotateActiveVideo` / manual admin activation: deactivate whichever video is currently active under
    /// `ar_content_id`, activate `video_id`, and repoint
    /// `ar_contents.active_video_id`, all inside one immediate
    /// transaction so a concurrent reader never observes zero or two
    /// active videos.
    pub async fn set_active_video(&self, ar_content_id: i64, video_id: i64, when: DateTime<Utc>) -> Result<(), AppError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: Result<(), AppError> = async {
            sqlx::query("UPDATE videos SET is_active = 0, updated_at = ? WHERE ar_content_id = ? AND is_active = 1")
                .bind(when)
                .bind(ar_content_id)
                .execute(&mut *conn)
                .await?;
            sqlx::query("UPDATE videos SET is_active = 1, updated_at = ? WHERE id = ?")
                .bind(when)
                .bind(video_id)
                .execute(&mut *conn)
                .await?;
            sqlx::query("UPDATE ar_contents SET active_video_id = ?, updated_at = ? WHERE id = ?")
                .bind(video_id)
                .bind(when)
                .bind(ar_content_id)
                .execute(&mut *conn)
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(())
            }
            Err(error) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(error)
            }
        }
    }

    /// Clears a video's active flag without promoting a replacement.
    /// Used by the admin soft-delete endpoint; a video that is not the
    /// current active video is already invisible to public resolution,
    /// so this is the video-level equivalent of `is_active = false`.
    pub async fn deactivate_video(&self, ar_content_id: i64, video_id: i64, when: DateTime<Utc>) -> Result<(), AppError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: Result<(), AppError> = async {
            sqlx::query("UPDATE videos SET is_active = 0, updated_at = ? WHERE id = ?")
                .bind(when)
                .bind(video_id)
                .execute(&mut *conn)
                .await?;
            sqlx::query("UPDATE ar_contents SET active_video_id = NULL, updated_at = ? WHERE id = ? AND active_video_id = ?")
                .bind(when)
                .bind(ar_content_id)
                .bind(video_id)
                .execute(&mut *conn)
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(())
            }
            Err(error) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(error)
            }
        }
    }

    // =========================================================================
    // VideoRotationSchedule
    // =========================================================================

    pub async fn insert_rotation_schedule(&self, s: &VideoRotationSchedule) -> Result<i64, AppError> {
        let result = sqlx::query(
            "INSERT INTO video_rotation_schedules
             (ar_content_id, rotation_type, time_of_day, day_of_week, day_of_month,
              video_sequence_json, current_index, last_rotation_at, next_rotation_at,
              is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(s.ar_content_id)
        .bind(&s.rotation_type)
        .bind(&s.time_of_day)
        .bind(s.day_of_week)
        .bind(s.day_of_month)
        .bind(&s.video_sequence_json)
        .bind(s.current_index)
        .bind(s.last_rotation_at)
        .bind(s.next_rotation_at)
        .bind(s.is_active)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_rotation_schedule_by_ar_content(
        &self,
        ar_content_id: i64,
    ) -> Result<Option<VideoRotationSchedule>, AppError> {
        let row = sqlx::query_as::<_, VideoRotationSchedule>(
            "SELECT * FROM video_rotation_schedules WHERE ar_content_id = ?",
        )
        .bind(ar_content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Candidates for the five-minute rotation tick.
    pub async fn list_due_rotation_schedules(&self, now: DateTime<Utc>) -> Result<Vec<VideoRotationSchedule>, AppError> {
        let rows = sqlx::query_as::<_, VideoRotationSchedule>(
            "SELECT * FROM video_rotation_schedules WHERE is_active = 1 AND next_rotation_at <= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Advance a schedule after a rotation tick.
    /// `is_active = false` is used to park a schedule whose
    /// `video_sequence` emptied out after stale-entry filtering.
    #[allow(clippy::too_many_arguments)]
    pub async fn advance_rotation_schedule(
        &self,
        id: i64,
        current_index: i64,
        last_rotation_at: DateTime<Utc>,
        next_rotation_at: DateTime<Utc>,
        is_active: bool,
        when: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE video_rotation_schedules
             SET current_index = ?, last_rotation_at = ?, next_rotation_at = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(current_index)
        .bind(last_rotation_at)
        .bind(next_rotation_at)
        .bind(is_active)
        .bind(when)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Notification
    // =========================================================================

    pub async fn insert_notification(&self, n: &Notification) -> Result<i64, AppError> {
        let result = sqlx::query(
            "INSERT INTO notifications
             (company_id, project_id, ar_content_id, kind, subject, message, metadata_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(n.company_id)
        .bind(n.project_id)
        .bind(n.ar_content_id)
        .bind(&n.kind)
        .bind(&n.subject)
        .bind(&n.message)
        .bind(&n.metadata_json)
        .bind(n.created_at)
        .execute(&self.pool)
        .await?;

        crate::metrics::NOTIFICATIONS_SENT_TOTAL.with_label_values(&[&n.kind]).inc();
        Ok(result.last_insert_rowid())
    }

    pub async fn list_notifications(
        &self,
        company_id: Option<i64>,
        kind: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let rows = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications
             WHERE (?1 IS NULL OR company_id = ?1) AND (?2 IS NULL OR kind = ?2)
             ORDER BY created_at DESC LIMIT ?3 OFFSET ?4",
        )
        .bind(company_id)
        .bind(kind)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // =========================================================================
    // Jobs (durable queue)
    // =========================================================================
    //
    // Jobs are not a modeled entity (§3) in their own right, so their id
    // stays an opaque string the enqueuing caller generates itself
    // (a ULID) rather than a DB-assigned integer.

    pub async fn enqueue_job(&self, id: &str, kind: JobKind, payload_json: &str, run_after: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO jobs (id, queue, job_kind, payload_json, attempt, status, enqueued_at, run_after)
             VALUES (?, ?, ?, ?, 0, 'queued', ?, ?)",
        )
        .bind(id)
        .bind(kind.queue())
        .bind(kind.as_str())
        .bind(payload_json)
        .bind(Utc::now())
        .bind(run_after)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claim the oldest due job on `queue` for `worker_id`. Uses an
    /// immediate transaction so two workers never claim the same row.
    pub async fn claim_next_job(&self, queue: &str, worker_id: &str) -> Result<Option<Job>, AppError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: Result<Option<Job>, AppError> = async {
            let candidate = sqlx::query_as::<_, Job>(
                "SELECT * FROM jobs WHERE queue = ? AND status = 'queued' AND run_after <= ?
                 ORDER BY run_after LIMIT 1",
            )
            .bind(queue)
            .bind(Utc::now())
            .fetch_optional(&mut *conn)
            .await?;

            let Some(job) = candidate else {
                return Ok(None);
            };

            sqlx::query("UPDATE jobs SET status = 'claimed', locked_by = ?, locked_at = ? WHERE id = ?")
                .bind(worker_id)
                .bind(Utc::now())
                .bind(&job.id)
                .execute(&mut *conn)
                .await?;
            Ok(Some(job))
        }
        .await;

        match result {
            Ok(job) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(job)
            }
            Err(error) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(error)
            }
        }
    }

    pub async fn complete_job(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE jobs SET status = 'done', locked_by = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Re-queue a job for a retry with exponential backoff.
    pub async fn retry_job(&self, id: &str, run_after: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE jobs SET status = 'queued', attempt = attempt + 1, run_after = ?, locked_by = NULL
             WHERE id = ?",
        )
        .bind(run_after)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_job_terminal(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE jobs SET status = 'failed', locked_by = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn queue_depth(&self) -> Result<i64, AppError> {
        let row: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'claimed')")
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }
}
