//! Error types for AR Portal
//!
//! All errors that cross into the HTTP layer are converted to `AppError`,
//! which implements `IntoResponse` for a uniform JSON error body. Workers
//! (C4, C5) never propagate `AppError` to a caller — there is no
//! synchronous caller — they match on it, log, and turn terminal failures
//! into `Notification` rows instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use thiserror::Error;

/// Storage-provider error taxonomy: transient vs. permanent. Kept separate
/// from `AppError` so the marker pipeline's retry loop can match on it
/// directly instead of string-sniffing a message.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("permanent storage error: {0}")]
    Permanent(String),

    #[error("credential expired or invalid for this connection")]
    CredentialExpired,
}

impl StorageError {
    /// Whether the marker pipeline should retry this error with backoff.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Application-wide error type.
///
/// Represents every error that can occur in request handlers. Background
/// jobs use the same taxonomy internally but convert terminal outcomes to
/// `Notification` rows rather than returning this type to a caller.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found, or inactive/gated content (404)
    #[error("resource not found")]
    NotFound,

    /// Malformed request / constraint violation (400)
    #[error("validation error: {0}")]
    Validation(String),

    /// Unique-slug collision or simultaneous edit (409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unprocessable entity (422)
    #[error("unprocessable entity: {0}")]
    Unprocessable(String),

    /// Missing or invalid admin session (401)
    #[error("unauthorized")]
    Unauthorized,

    /// Database error (500)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage-provider error (500/502 depending on kind)
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Credential refresh failed; connection marked broken (502)
    #[error("credential expired")]
    CredentialExpired,

    /// Marker compiler exited non-zero or timed out (502)
    #[error("marker compiler failed: {0}")]
    CompilerFailed(String),

    /// Configuration error (500)
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal bug or invariant violation surfaced as 500
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status and a `{code, message,
    /// timestamp}` JSON body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, message, code) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), "conflict"),
            AppError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg.clone(),
                "unprocessable",
            ),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string(), "unauthorized"),
            AppError::CredentialExpired => (
                StatusCode::BAD_GATEWAY,
                self.to_string(),
                "credential_expired",
            ),
            AppError::CompilerFailed(msg) => {
                (StatusCode::BAD_GATEWAY, msg.clone(), "compiler_failed")
            }
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error".to_string(),
                "database",
            ),
            AppError::Storage(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "storage"),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
                "internal",
            ),
        };

        crate::metrics::ERRORS_TOTAL.with_label_values(&[code]).inc();

        let body = Json(serde_json::json!({
            "code": code,
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
