//! Data models
//!
//! Rust structs representing the platform's core entities. Surrogate
//! primary keys are DB-assigned monotonic integers (`INTEGER PRIMARY KEY
//! AUTOINCREMENT`); `ARContent::unique_id` is the one exception — a
//! UUIDv4 that is the stable external identifier and is never
//! regenerated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Storage connection (C1 / C2)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum StorageProviderKind {
    Local,
    S3,
    CloudDisk,
}

impl StorageProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::CloudDisk => "cloud_disk",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "s3" => Some(Self::S3),
            "cloud_disk" => Some(Self::CloudDisk),
            _ => None,
        }
    }
}

/// A configured instance of a storage provider.
///
/// `credentials` is an opaque, encrypted-at-rest JSON blob; C3 never
/// interprets it — only C1/C2 do.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StorageConnection {
    pub id: i64,
    pub name: String,
    pub provider: String,
    /// Encrypted JSON blob, base64-encoded. Opaque to everything but C2.
    pub credentials_encrypted: String,
    pub base_path: String,
    pub is_default: bool,
    pub is_active: bool,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub test_status: Option<String>,
    pub test_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decrypted OAuth token set held for cloud-disk connections (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// Company
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub contact_email: String,
    pub storage_connection_id: i64,
    pub storage_path: String,
    pub storage_quota_bytes: i64,
    pub storage_used_bytes: i64,
    pub subscription_tier: String,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Set when folder bootstrap fails non-fatally.
    pub storage_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Project
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    Active,
    Expired,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: String,
    pub notify_before_expiry_days: i64,
    pub last_notification_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn status_enum(&self) -> Option<ProjectStatus> {
        ProjectStatus::from_str(&self.status)
    }
}

// =============================================================================
// ARContent
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl MarkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A publishable AR content unit binding one marker image to one or more
/// overlay videos, addressable by `unique_id`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ARContent {
    pub id: i64,
    pub project_id: i64,
    /// Denormalized for query efficiency.
    pub company_id: i64,
    /// Stable external identifier (UUIDv4). Never regenerated.
    pub unique_id: String,
    pub title: String,
    pub image_path: String,
    pub image_url: Option<String>,
    pub marker_path: Option<String>,
    pub marker_url: Option<String>,
    pub marker_status: String,
    pub marker_feature_points: Option<i64>,
    pub is_active: bool,
    pub active_video_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ARContent {
    pub fn marker_status_enum(&self) -> Option<MarkerStatus> {
        MarkerStatus::from_str(&self.marker_status)
    }
}

// =============================================================================
// Video
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Video {
    pub id: i64,
    pub ar_content_id: i64,
    pub title: String,
    pub video_path: String,
    pub video_url: Option<String>,
    pub duration_seconds: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub mime_type: String,
    pub is_active: bool,
    pub rotation_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// VideoRotationSchedule
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationType {
    Daily,
    Weekly,
    Monthly,
    Random,
}

impl RotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Random => "random",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

/// One row per `ARContent` participating in rotation.
///
/// `video_sequence` is persisted as a JSON array of video ids.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoRotationSchedule {
    pub id: i64,
    pub ar_content_id: i64,
    pub rotation_type: String,
    pub time_of_day: Option<String>,
    pub day_of_week: Option<i64>,
    pub day_of_month: Option<i64>,
    /// JSON-encoded `Vec<i64>` of video ids, in rotation order.
    pub video_sequence_json: String,
    pub current_index: i64,
    pub last_rotation_at: Option<DateTime<Utc>>,
    pub next_rotation_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoRotationSchedule {
    pub fn rotation_type_enum(&self) -> Option<RotationType> {
        RotationType::from_str(&self.rotation_type)
    }

    pub fn video_sequence(&self) -> Vec<i64> {
        serde_json::from_str(&self.video_sequence_json).unwrap_or_default()
    }
}

// =============================================================================
// Notification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    ExpiryWarning,
    Expired,
    MarkerFailed,
    CredentialFailed,
    RotationStaleSchedule,
    StorageDegraded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpiryWarning => "expiry_warning",
            Self::Expired => "expired",
            Self::MarkerFailed => "marker_failed",
            Self::CredentialFailed => "credential_failed",
            Self::RotationStaleSchedule => "rotation_stale_schedule",
            Self::StorageDegraded => "storage_degraded",
        }
    }
}

/// Append-only event record. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub company_id: i64,
    pub project_id: Option<i64>,
    pub ar_content_id: Option<i64>,
    pub kind: String,
    pub subject: String,
    pub message: String,
    /// Opaque JSON metadata blob.
    pub metadata_json: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Job envelope (durable queue)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    GenerateMarker,
    CheckExpiringProjects,
    DeactivateExpired,
    RotateVideos,
    RefreshTokens,
    SendNotification,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateMarker => "generate_marker",
            Self::CheckExpiringProjects => "check_expiring_projects",
            Self::DeactivateExpired => "deactivate_expired",
            Self::RotateVideos => "rotate_videos",
            Self::RefreshTokens => "refresh_tokens",
            Self::SendNotification => "send_notification",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "generate_marker" => Some(Self::GenerateMarker),
            "check_expiring_projects" => Some(Self::CheckExpiringProjects),
            "deactivate_expired" => Some(Self::DeactivateExpired),
            "rotate_videos" => Some(Self::RotateVideos),
            "refresh_tokens" => Some(Self::RefreshTokens),
            "send_notification" => Some(Self::SendNotification),
            _ => None,
        }
    }

    /// Which logical queue this job kind is dispatched on.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::GenerateMarker => "markers",
            Self::SendNotification => "notifications",
            Self::CheckExpiringProjects | Self::DeactivateExpired | Self::RotateVideos | Self::RefreshTokens => "default",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub job_kind: String,
    /// Opaque JSON payload, shape depends on `job_kind`.
    pub payload_json: String,
    pub attempt: i64,
    pub status: String,
    pub enqueued_at: DateTime<Utc>,
    pub run_after: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}
