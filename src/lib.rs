//! AR Portal - B2B augmented-reality content lifecycle platform
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Public resolution API (viewer)                           │
//! │  - Admin API (CRUD, multipart upload, OAuth callback)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Content Repository · Marker Pipeline · Scheduler    │
//! │  - Company/project/content lifecycle (C3)                   │
//! │  - Durable marker-generation job queue (C4)                 │
//! │  - Periodic expiry/rotation ticks (C5)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! │  - Storage providers: local disk, S3-compatible, cloud-disk │
//! │  - Encrypted credential store                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for the public resolution API and admin CRUD
//! - `auth`: single-admin static-credential login
//! - `content`: compound lifecycle operations spanning more than one row
//! - `credentials`: encryption at rest and OAuth token refresh
//! - `data`: database and entity models
//! - `pipeline`: marker-generation worker pool
//! - `scheduler`: periodic expiry-warning, deactivation, and rotation ticks
//! - `storage`: storage-provider backends
//! - `config`: configuration management
//! - `error`: error types

pub mod api;
pub mod auth;
pub mod config;
pub mod content;
pub mod credentials;
pub mod data;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

/// Application state shared across all handlers.
///
/// Cloned per request; every field is an `Arc` so the clone is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::AppConfig>,
    pub db: Arc<data::Database>,
    pub content: Arc<content::ContentRepository>,
    pub credentials: Arc<credentials::CredentialStore>,
}

impl AppState {
    /// Initialize application state.
    ///
    /// 1. Connect to SQLite and run migrations.
    /// 2. Build the credential store from the configured encryption key.
    /// 3. Build the content repository (C3), which storage providers are
    ///    constructed through on demand.
    /// 4. Seed the default local storage connection and default company,
    ///    if a fresh database has neither yet.
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db_path = Path::new(&config.database.path);
        let db = Arc::new(data::Database::connect(db_path, config.database.pool_size).await?);
        tracing::info!("Database connected");

        let credentials = Arc::new(credentials::CredentialStore::new(&config.credentials)?);
        let storage_cfg = Arc::new(config.storage.clone());
        let content = Arc::new(content::ContentRepository::new(
            db.clone(),
            credentials.clone(),
            storage_cfg,
            config.server.public_base_url.clone(),
        ));

        content.seed_defaults().await?;
        tracing::info!("Application state initialized successfully");

        Ok(Self { config: Arc::new(config), db, content, credentials })
    }
}
