//! Admin API endpoints.
//!
//! CRUD for companies, projects, AR content, storage connections, and
//! rotation schedules. Every route requires a valid admin session via
//! `CurrentUser`.

use axum::{
    Router,
    extract::{Multipart, Path, State},
    response::Json,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::auth::CurrentUser;
use crate::content::CreateCompanyRequest;
use crate::data::{
    ARContent, Company, JobKind, MarkerStatus, Notification, Project, ProjectStatus, RotationType,
    StorageConnection, StorageProviderKind, Video, VideoRotationSchedule,
};
use crate::error::{AppError, Result};
use crate::storage;

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/companies", post(create_company).get(list_companies))
        .route("/companies/:id", get(get_company))
        .route("/companies/:id/active", post(set_company_active))
        .route("/companies/:id/storage-usage", get(get_storage_usage))
        .route("/companies/:id/projects", post(create_project).get(list_projects))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/archive", post(archive_project))
        .route("/projects/:id/content", post(create_ar_content).get(list_ar_content))
        .route("/content/:id", get(get_content_detail))
        .route("/content/:id/active", post(set_content_active))
        .route("/content/:id/videos", post(upload_video).get(list_videos))
        .route("/content/:id/active-video", post(activate_video))
        .route("/content/:id/videos/:video_id", delete(deactivate_video))
        .route("/content/:id/reset-marker", post(reset_marker))
        .route("/content/:id/rotation-schedule", post(set_rotation_schedule).get(get_rotation_schedule))
        .route("/storage-connections", post(create_storage_connection).get(list_storage_connections))
        .route("/storage-connections/:id", get(get_storage_connection))
        .route("/storage-connections/:id/test", post(test_storage_connection))
        .route("/storage-connections/:id/activate", post(activate_storage_connection))
        .route("/notifications", get(list_notifications))
}

// =============================================================================
// Companies
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateCompanyBody {
    name: String,
    contact_email: String,
    storage_connection_id: i64,
    #[serde(default = "default_quota_bytes")]
    storage_quota_bytes: i64,
}

fn default_quota_bytes() -> i64 {
    10 * 1024 * 1024 * 1024
}

async fn create_company(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Json(body): Json<CreateCompanyBody>,
) -> Result<Json<Company>> {
    let company = state
        .content
        .create_company(CreateCompanyRequest {
            name: body.name,
            contact_email: body.contact_email,
            storage_connection_id: body.storage_connection_id,
            storage_quota_bytes: body.storage_quota_bytes,
        })
        .await?;
    Ok(Json(company))
}

async fn list_companies(State(state): State<AppState>, CurrentUser(_user): CurrentUser) -> Result<Json<Vec<Company>>> {
    Ok(Json(state.db.list_companies().await?))
}

async fn get_company(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Company>> {
    Ok(Json(state.db.get_company(id).await?.ok_or(AppError::NotFound)?))
}

#[derive(Debug, Deserialize)]
struct SetActiveBody {
    is_active: bool,
}

async fn set_company_active(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
    Json(body): Json<SetActiveBody>,
) -> Result<Json<Company>> {
    state.db.get_company(id).await?.ok_or(AppError::NotFound)?;
    state.db.set_company_active(id, body.is_active).await?;
    Ok(Json(state.db.get_company(id).await?.ok_or(AppError::NotFound)?))
}

#[derive(Debug, Serialize)]
struct StorageUsageResponse {
    company_id: i64,
    recorded_used_bytes: i64,
    provider_used_bytes: u64,
    provider_quota_bytes: Option<u64>,
    drift_bytes: i64,
}

/// Compares the company's recorded `storage_used_bytes` against a live
/// read from its storage provider. Read-only: callers decide whether
/// drift warrants a reconciliation write via a separate write path.
async fn get_storage_usage(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<StorageUsageResponse>> {
    let company = state.db.get_company(id).await?.ok_or(AppError::NotFound)?;
    let connection = state.db.get_storage_connection(company.storage_connection_id).await?.ok_or(AppError::NotFound)?;
    let provider = storage::build_provider(&connection, &state.credentials, &state.config.storage, &state.config.server.public_base_url)?;
    let usage = provider.usage(&company.storage_path).await?;

    Ok(Json(StorageUsageResponse {
        company_id: company.id,
        recorded_used_bytes: company.storage_used_bytes,
        provider_used_bytes: usage.used_bytes,
        provider_quota_bytes: usage.quota_bytes,
        drift_bytes: usage.used_bytes as i64 - company.storage_used_bytes,
    }))
}

// =============================================================================
// Projects
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateProjectBody {
    name: String,
    starts_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_notify_days")]
    notify_before_expiry_days: i64,
}

fn default_notify_days() -> i64 {
    7
}

async fn create_project(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(company_id): Path<i64>,
    Json(body): Json<CreateProjectBody>,
) -> Result<Json<Project>> {
    state.db.get_company(company_id).await?.ok_or(AppError::NotFound)?;

    let now = Utc::now();
    let mut project = Project {
        id: 0,
        company_id,
        name: body.name,
        starts_at: body.starts_at,
        expires_at: body.expires_at,
        status: ProjectStatus::Active.as_str().to_string(),
        notify_before_expiry_days: body.notify_before_expiry_days,
        last_notification_sent_at: None,
        created_at: now,
        updated_at: now,
    };
    project.id = state.db.insert_project(&project).await?;
    Ok(Json(project))
}

async fn list_projects(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(company_id): Path<i64>,
) -> Result<Json<Vec<Project>>> {
    Ok(Json(state.db.list_projects_by_company(company_id).await?))
}

async fn get_project(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Project>> {
    Ok(Json(state.db.get_project(id).await?.ok_or(AppError::NotFound)?))
}

/// Archives a project immediately, bypassing the usual `active ->
/// expired` transition the expiry scheduler drives. A project's
/// soft-delete state is its `status` column, not a separate flag.
async fn archive_project(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Project>> {
    state.db.get_project(id).await?.ok_or(AppError::NotFound)?;
    state.db.archive_project(id, Utc::now()).await?;
    Ok(Json(state.db.get_project(id).await?.ok_or(AppError::NotFound)?))
}

// =============================================================================
// AR content
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateContentBody {
    title: String,
}

/// POST /projects/{id}/content
///
/// Multipart upload: the `metadata` part carries the JSON body above, the
/// `image` part carries the marker source image. Uploads the image
/// through the owning company's storage provider, inserts the row with
/// `marker_status = pending`, and enqueues a `generate_marker` job.
async fn create_ar_content(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(project_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<ARContent>> {
    let project = state.db.get_project(project_id).await?.ok_or(AppError::NotFound)?;
    let company = state.db.get_company(project.company_id).await?.ok_or(AppError::NotFound)?;

    let mut title: Option<String> = None;
    let mut image_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation(e.to_string()))? {
        match field.name() {
            Some("metadata") => {
                let bytes = field.bytes().await.map_err(|e| AppError::Validation(e.to_string()))?;
                let body: CreateContentBody =
                    serde_json::from_slice(&bytes).map_err(|e| AppError::Validation(format!("invalid metadata: {e}")))?;
                title = Some(body.title);
            }
            Some("image") => {
                image_bytes = Some(field.bytes().await.map_err(|e| AppError::Validation(e.to_string()))?.to_vec());
            }
            _ => {}
        }
    }

    let title = title.ok_or_else(|| AppError::Validation("missing metadata part".into()))?;
    let image_bytes = image_bytes.ok_or_else(|| AppError::Validation("missing image part".into()))?;

    let unique_id = Uuid::new_v4().to_string();
    let image_key = format!("{}/content/{unique_id}/source.jpg", company.storage_path);

    let scratch = std::env::temp_dir().join(format!("arportal-upload-{unique_id}"));
    tokio::fs::create_dir_all(&scratch).await.map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    let scratch_file = scratch.join("source.jpg");
    tokio::fs::write(&scratch_file, &image_bytes).await.map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    let connection = state
        .db
        .get_storage_connection(company.storage_connection_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let provider = storage::build_provider(&connection, &state.credentials, &state.config.storage, &state.config.server.public_base_url)?;
    provider.upload(&scratch_file, &image_key, "image/jpeg").await?;
    let _ = tokio::fs::remove_dir_all(&scratch).await;

    let now = Utc::now();
    let mut content = ARContent {
        id: 0,
        project_id: project.id,
        company_id: company.id,
        unique_id,
        title,
        image_path: image_key,
        image_url: None,
        marker_path: None,
        marker_url: None,
        marker_status: MarkerStatus::Pending.as_str().to_string(),
        marker_feature_points: None,
        is_active: true,
        active_video_id: None,
        created_at: now,
        updated_at: now,
    };
    content.id = state.db.insert_ar_content(&content).await?;

    let payload = serde_json::json!({ "ar_content_id": content.id }).to_string();
    state.db.enqueue_job(&ulid::Ulid::new().to_string(), JobKind::GenerateMarker, &payload, now).await?;

    Ok(Json(content))
}

async fn list_ar_content(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<ARContent>>> {
    Ok(Json(state.db.list_ar_content_by_project(project_id).await?))
}

async fn get_content_detail(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<ARContent>> {
    Ok(Json(state.db.get_ar_content(id).await?.ok_or(AppError::NotFound)?))
}

async fn set_content_active(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
    Json(body): Json<SetActiveBody>,
) -> Result<Json<ARContent>> {
    state.db.get_ar_content(id).await?.ok_or(AppError::NotFound)?;
    state.db.set_ar_content_active(id, body.is_active).await?;
    Ok(Json(state.db.get_ar_content(id).await?.ok_or(AppError::NotFound)?))
}

async fn reset_marker(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<()> {
    state.content.reset_marker(id).await?;
    let payload = serde_json::json!({ "ar_content_id": id }).to_string();
    state.db.enqueue_job(&ulid::Ulid::new().to_string(), JobKind::GenerateMarker, &payload, Utc::now()).await?;
    Ok(())
}

// =============================================================================
// Videos
// =============================================================================

#[derive(Debug, Deserialize)]
struct VideoMetadata {
    title: String,
    #[serde(default)]
    rotation_order: i64,
}

async fn upload_video(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(ar_content_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<Video>> {
    let content = state.db.get_ar_content(ar_content_id).await?.ok_or(AppError::NotFound)?;
    let company = state.db.get_company(content.company_id).await?.ok_or(AppError::NotFound)?;

    let mut metadata: Option<VideoMetadata> = None;
    let mut video_bytes: Option<Vec<u8>> = None;
    let mut mime_type = "video/mp4".to_string();

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation(e.to_string()))? {
        match field.name() {
            Some("metadata") => {
                let bytes = field.bytes().await.map_err(|e| AppError::Validation(e.to_string()))?;
                metadata = Some(serde_json::from_slice(&bytes).map_err(|e| AppError::Validation(format!("invalid metadata: {e}")))?);
            }
            Some("video") => {
                if let Some(ct) = field.content_type() {
                    mime_type = ct.to_string();
                }
                video_bytes = Some(field.bytes().await.map_err(|e| AppError::Validation(e.to_string()))?.to_vec());
            }
            _ => {}
        }
    }

    let metadata = metadata.ok_or_else(|| AppError::Validation("missing metadata part".into()))?;
    let video_bytes = video_bytes.ok_or_else(|| AppError::Validation("missing video part".into()))?;

    let upload_scratch_id = Uuid::new_v4();
    let video_key = format!("{}/videos/{upload_scratch_id}.mp4", company.storage_path);

    let scratch = std::env::temp_dir().join(format!("arportal-video-{upload_scratch_id}"));
    tokio::fs::create_dir_all(&scratch).await.map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    let scratch_file = scratch.join("video.mp4");
    tokio::fs::write(&scratch_file, &video_bytes).await.map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    let connection = state
        .db
        .get_storage_connection(company.storage_connection_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let provider = storage::build_provider(&connection, &state.credentials, &state.config.storage, &state.config.server.public_base_url)?;
    provider.upload(&scratch_file, &video_key, &mime_type).await?;
    let _ = tokio::fs::remove_dir_all(&scratch).await;

    let now = Utc::now();
    let mut video = Video {
        id: 0,
        ar_content_id,
        title: metadata.title,
        video_path: video_key,
        video_url: None,
        duration_seconds: None,
        width: None,
        height: None,
        mime_type,
        is_active: false,
        rotation_order: metadata.rotation_order,
        created_at: now,
        updated_at: now,
    };
    video.id = state.db.insert_video(&video).await?;
    Ok(Json(video))
}

async fn list_videos(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(ar_content_id): Path<i64>,
) -> Result<Json<Vec<Video>>> {
    Ok(Json(state.db.list_videos_by_ar_content(ar_content_id).await?))
}

#[derive(Debug, Deserialize)]
struct ActivateVideoBody {
    video_id: i64,
}

async fn activate_video(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(ar_content_id): Path<i64>,
    Json(body): Json<ActivateVideoBody>,
) -> Result<()> {
    let video = state.db.get_video(body.video_id).await?.ok_or(AppError::NotFound)?;
    state.content.set_active_video(ar_content_id, &video).await
}

/// Soft-deletes a video by clearing its active flag. A video is a leaf
/// entity below `ARContent`, not a standalone resolvable resource, so
/// there is no separate `is_active` column to flip — going inactive is
/// already equivalent to being removed from public view.
async fn deactivate_video(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path((ar_content_id, video_id)): Path<(i64, i64)>,
) -> Result<()> {
    state.db.get_video(video_id).await?.ok_or(AppError::NotFound)?;
    state.db.deactivate_video(ar_content_id, video_id, Utc::now()).await
}

// =============================================================================
// Rotation schedule
// =============================================================================

#[derive(Debug, Deserialize)]
struct SetRotationScheduleBody {
    rotation_type: String,
    time_of_day: Option<String>,
    day_of_week: Option<i64>,
    day_of_month: Option<i64>,
    video_ids: Vec<i64>,
}

async fn set_rotation_schedule(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(ar_content_id): Path<i64>,
    Json(body): Json<SetRotationScheduleBody>,
) -> Result<Json<VideoRotationSchedule>> {
    state.db.get_ar_content(ar_content_id).await?.ok_or(AppError::NotFound)?;
    let rotation_type = RotationType::from_str(&body.rotation_type)
        .ok_or_else(|| AppError::Validation(format!("unknown rotation_type '{}'", body.rotation_type)))?;
    if body.video_ids.is_empty() {
        return Err(AppError::Validation("video_ids must not be empty".into()));
    }

    let owned_videos = state.db.list_videos_by_ar_content(ar_content_id).await?;
    let owned_video_ids: std::collections::HashSet<i64> = owned_videos.iter().map(|v| v.id).collect();
    if let Some(foreign_id) = body.video_ids.iter().find(|id| !owned_video_ids.contains(id)) {
        return Err(AppError::Validation(format!(
            "video '{foreign_id}' does not belong to this AR content"
        )));
    }

    let now = Utc::now();
    let mut schedule = VideoRotationSchedule {
        id: 0,
        ar_content_id,
        rotation_type: rotation_type.as_str().to_string(),
        time_of_day: body.time_of_day,
        day_of_week: body.day_of_week,
        day_of_month: body.day_of_month,
        video_sequence_json: serde_json::to_string(&body.video_ids).map_err(|e| AppError::Internal(e.into()))?,
        current_index: 0,
        last_rotation_at: None,
        next_rotation_at: now,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    schedule.id = state.db.insert_rotation_schedule(&schedule).await?;
    Ok(Json(schedule))
}

async fn get_rotation_schedule(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(ar_content_id): Path<i64>,
) -> Result<Json<VideoRotationSchedule>> {
    Ok(Json(
        state
            .db
            .get_rotation_schedule_by_ar_content(ar_content_id)
            .await?
            .ok_or(AppError::NotFound)?,
    ))
}

// =============================================================================
// Storage connections
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateStorageConnectionBody {
    name: String,
    provider: String,
    base_path: String,
    #[serde(default)]
    access_key_id: Option<String>,
    #[serde(default)]
    secret_access_key: Option<String>,
    #[serde(default)]
    bucket: Option<String>,
}

async fn create_storage_connection(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Json(body): Json<CreateStorageConnectionBody>,
) -> Result<Json<StorageConnection>> {
    let kind = StorageProviderKind::from_str(&body.provider)
        .ok_or_else(|| AppError::Validation(format!("unknown provider '{}'", body.provider)))?;
    if kind == StorageProviderKind::CloudDisk {
        return Err(AppError::Validation(
            "cloud-disk connections are created through /oauth/cloud_disk/authorize, not this endpoint".into(),
        ));
    }

    let credentials_encrypted = state.credentials.encrypt_static_credentials(&crate::credentials::StaticCredentials {
        access_key_id: body.access_key_id,
        secret_access_key: body.secret_access_key,
        bucket: body.bucket,
    })?;

    let now = Utc::now();
    let mut connection = StorageConnection {
        id: 0,
        name: body.name,
        provider: kind.as_str().to_string(),
        credentials_encrypted,
        base_path: body.base_path,
        is_default: false,
        is_active: true,
        last_tested_at: None,
        test_status: None,
        test_error: None,
        created_at: now,
        updated_at: now,
    };
    connection.id = state.db.insert_storage_connection(&connection).await?;
    Ok(Json(connection))
}

async fn list_storage_connections(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<Vec<StorageConnection>>> {
    Ok(Json(state.db.list_storage_connections().await?))
}

async fn get_storage_connection(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<StorageConnection>> {
    Ok(Json(state.db.get_storage_connection(id).await?.ok_or(AppError::NotFound)?))
}

#[derive(Debug, Serialize)]
struct TestConnectionResponse {
    ok: bool,
    latency_ms: u64,
    error: Option<String>,
}

async fn test_storage_connection(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<TestConnectionResponse>> {
    let connection = state.db.get_storage_connection(id).await?.ok_or(AppError::NotFound)?;
    let provider = storage::build_provider(&connection, &state.credentials, &state.config.storage, &state.config.server.public_base_url)?;
    let result = provider.test_connection().await;

    let status = if result.ok { "ok" } else { "failed" };
    state
        .db
        .update_storage_connection_test(id, status, result.err.as_deref(), Utc::now())
        .await?;

    Ok(Json(TestConnectionResponse { ok: result.ok, latency_ms: result.latency_ms, error: result.err }))
}

#[derive(Debug, Deserialize)]
struct ActivateConnectionBody {
    name: String,
    base_path: String,
}

/// POST /storage-connections/{id}/activate
///
/// Names and activates a connection created through the cloud-disk OAuth
/// callback (which inserts it inactive, with an empty `base_path` and a
/// placeholder name since the provider never supplies either).
async fn activate_storage_connection(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
    Json(body): Json<ActivateConnectionBody>,
) -> Result<()> {
    let mut connection = state.db.get_storage_connection(id).await?.ok_or(AppError::NotFound)?;
    let now = Utc::now();
    state.db.update_storage_connection_details(id, &body.name, &body.base_path, true, now).await?;
    connection.name = body.name;
    connection.base_path = body.base_path;

    let provider = storage::build_provider(&connection, &state.credentials, &state.config.storage, &state.config.server.public_base_url)?;
    provider.create_folder(&connection.base_path).await?;
    Ok(())
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Deserialize)]
struct ListNotificationsQuery {
    company_id: Option<i64>,
    kind: Option<String>,
    #[serde(default = "default_notifications_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_notifications_limit() -> i64 {
    50
}

async fn list_notifications(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    axum::extract::Query(q): axum::extract::Query<ListNotificationsQuery>,
) -> Result<Json<Vec<Notification>>> {
    let rows = state
        .db
        .list_notifications(q.company_id, q.kind.as_deref(), q.limit, q.offset)
        .await?;
    Ok(Json(rows))
}
