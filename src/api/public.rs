//! Public resolution API (C6).
//!
//! Unauthenticated endpoints a deployed AR viewer calls to resolve a
//! marker and its active overlay video by `unique_id`. Gated on both the
//! owning project's resolvability and the content's own `is_active` flag
//! so an expired project's content disappears without deleting any rows.

use axum::{
    Router,
    extract::{Path, State},
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Serialize;

use crate::AppState;
use crate::data::ARContent;
use crate::error::{AppError, Result};
use crate::storage;

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/content/:unique_id", get(get_content))
        .route("/content/:unique_id/active-video", get(get_active_video))
        .route("/view/:unique_id", get(view_shell))
}

#[derive(Debug, Serialize)]
struct ContentManifest {
    unique_id: String,
    title: String,
    marker_url: String,
    active_video: Option<ActiveVideoResponse>,
}

#[derive(Debug, Serialize)]
struct ActiveVideoResponse {
    video_id: i64,
    title: String,
    video_url: String,
    mime_type: String,
}

async fn resolve_content(state: &AppState, unique_id: &str) -> Result<ARContent> {
    let content = state
        .db
        .get_ar_content_by_unique_id(unique_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !content.is_active {
        return Err(AppError::NotFound);
    }
    let project = state.db.get_project(content.project_id).await?.ok_or(AppError::NotFound)?;
    if !project.status_enum().map(|s| s.is_resolvable()).unwrap_or(false) {
        return Err(AppError::NotFound);
    }
    Ok(content)
}

async fn materialize_content_url(state: &AppState, company_id: i64, key: &str) -> Result<String> {
    let company = state.db.get_company(company_id).await?.ok_or(AppError::NotFound)?;
    let connection = state
        .db
        .get_storage_connection(company.storage_connection_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let provider = storage::build_provider(
        &connection,
        &state.credentials,
        &state.config.storage,
        &state.config.server.public_base_url,
    )?;
    Ok(provider.materialize_url(key).await?)
}

/// GET /content/{unique_id}
///
/// Returns the marker manifest and the currently active video, if any.
/// 404 if the content is inactive, missing, or its project is not
/// currently resolvable (expired/archived).
async fn get_content(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
) -> Result<impl IntoResponse> {
    let content = resolve_content(&state, &unique_id).await?;
    let marker_path = content.marker_path.as_deref().ok_or(AppError::NotFound)?;
    let marker_url = materialize_content_url(&state, content.company_id, marker_path).await?;

    let active_video = match content.active_video_id {
        Some(video_id) => {
            let video = state.db.get_video(video_id).await?;
            match video {
                Some(v) if v.is_active => {
                    let video_url = materialize_content_url(&state, content.company_id, &v.video_path).await?;
                    Some(ActiveVideoResponse {
                        video_id: v.id,
                        title: v.title,
                        video_url,
                        mime_type: v.mime_type,
                    })
                }
                _ => None,
            }
        }
        None => None,
    };

    Ok(axum::Json(ContentManifest {
        unique_id: content.unique_id,
        title: content.title,
        marker_url,
        active_video,
    }))
}

/// GET /content/{unique_id}/active-video
///
/// Returns just the active video, separately resolvable so a viewer can
/// poll for rotation changes without re-fetching the marker.
async fn get_active_video(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
) -> Result<impl IntoResponse> {
    let content = resolve_content(&state, &unique_id).await?;
    let video_id = content.active_video_id.ok_or(AppError::NotFound)?;
    let video = state.db.get_video(video_id).await?.ok_or(AppError::NotFound)?;
    if !video.is_active {
        return Err(AppError::NotFound);
    }
    let video_url = materialize_content_url(&state, content.company_id, &video.video_path).await?;

    Ok(axum::Json(ActiveVideoResponse {
        video_id: video.id,
        title: video.title,
        video_url,
        mime_type: video.mime_type,
    }))
}

/// GET /view/{unique_id}
///
/// A minimal HTML shell that loads the marker manifest client-side and
/// boots the AR viewer. Exists so a QR code can point at a shareable URL
/// instead of requiring the embedding app to call the JSON API directly.
async fn view_shell(Path(unique_id): Path<String>) -> Result<impl IntoResponse> {
    // `unique_id` is a UUIDv4; reject anything else before it ever reaches
    // the HTML/script templates below rather than escaping it in place.
    let unique_id = uuid::Uuid::parse_str(&unique_id).map_err(|_| AppError::NotFound)?;

    Ok(Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>AR Portal viewer</title>
</head>
<body>
    <div id="ar-root" data-content-id="{unique_id}"></div>
    <script>
      fetch('/content/{unique_id}')
        .then(r => {{ if (!r.ok) throw new Error('content not found'); return r.json(); }})
        .then(manifest => {{ window.__AR_MANIFEST__ = manifest; }})
        .catch(err => {{ document.getElementById('ar-root').textContent = 'This experience is no longer available.'; }});
    </script>
</body>
</html>"#
    )))
}
