//! Configuration management
//!
//! Loads configuration from, in increasing priority:
//! 1. Default values
//! 2. `config/default.toml`
//! 3. `config/local.toml`
//! 4. Environment variables (`ARPORTAL__SECTION__FIELD`)

use serde::Deserialize;
use std::path::PathBuf;

/// Root application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
    pub credentials: CredentialsConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Whether cookies set by the admin session should carry the
    /// `Secure` attribute, inferred from the configured public URL.
    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.public_base_url.starts_with("https")
    }
}

/// Single-admin login. One static username/password pair is allowed to
/// authenticate; there is no multi-tenant admin RBAC.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub admin_username: String,
    pub admin_password: String,
    /// HMAC key signing the session cookie.
    pub session_secret: String,
    #[serde(default = "default_session_max_age_seconds")]
    pub session_max_age: i64,
}

fn default_session_max_age_seconds() -> i64 {
    60 * 60 * 24 * 7
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL used to materialize stable (local/S3) media URLs.
    pub public_base_url: String,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    10
}

/// Storage defaults used when bootstrapping the seeded local connection
/// and as fallbacks for new S3/cloud-disk connections.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub local_base_path: PathBuf,
    #[serde(default)]
    pub s3: S3DefaultsConfig,
    #[serde(default)]
    pub oauth: OAuthProvidersConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S3DefaultsConfig {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    #[serde(default = "default_presign_expiry_seconds")]
    pub presign_expiry_seconds: u64,
}

fn default_presign_expiry_seconds() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OAuthProvidersConfig {
    #[serde(default)]
    pub cloud_disk: Option<OAuthClientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: String,
    /// Base URL of the provider's file/folder REST API (distinct from its
    /// OAuth authorize/token endpoints).
    pub api_base: String,
}

/// Marker pipeline (C4) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Path to the external MindAR-compatible compiler binary.
    pub compiler_path: PathBuf,
    #[serde(default = "default_compiler_max_features")]
    pub compiler_max_features: u32,
    #[serde(default = "default_compiler_timeout_seconds")]
    pub compiler_timeout_seconds: u64,
    #[serde(default = "default_markers_workers")]
    pub markers_workers: usize,
    #[serde(default = "default_notifications_workers")]
    pub notifications_workers: usize,
    #[serde(default = "default_default_queue_workers")]
    pub default_queue_workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

fn default_compiler_max_features() -> u32 {
    2000
}
fn default_compiler_timeout_seconds() -> u64 {
    120
}
fn default_markers_workers() -> usize {
    2
}
fn default_notifications_workers() -> usize {
    1
}
fn default_default_queue_workers() -> usize {
    1
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_seconds() -> u64 {
    2
}
fn default_shutdown_grace_seconds() -> u64 {
    30
}

/// Scheduler (C5) cadences. Exposed so tests can tighten intervals.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_expiry_warning_hour_utc")]
    pub expiry_warning_hour_utc: u32,
    #[serde(default = "default_deactivation_interval_seconds")]
    pub deactivation_interval_seconds: u64,
    #[serde(default = "default_rotation_interval_seconds")]
    pub rotation_interval_seconds: u64,
}

fn default_expiry_warning_hour_utc() -> u32 {
    9
}
fn default_deactivation_interval_seconds() -> u64 {
    60
}
fn default_rotation_interval_seconds() -> u64 {
    300
}

/// Credential store (C2) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Base64-encoded 32-byte key for AES-GCM encryption at rest.
    pub encryption_key_base64: String,
    #[serde(default = "default_refresh_lookahead_seconds")]
    pub refresh_lookahead_seconds: i64,
    #[serde(default = "default_refresh_tick_seconds")]
    pub refresh_tick_seconds: u64,
}

fn default_refresh_lookahead_seconds() -> i64 {
    300
}
fn default_refresh_tick_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment.
    ///
    /// # Errors
    /// Returns `AppError::Config` if configuration is invalid or missing a
    /// required field with no default (e.g. `credentials.encryption_key_base64`).
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let cfg = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.public_base_url", "http://localhost:8080")?
            .set_default("database.pool_size", 10)?
            .set_default("storage.local_base_path", "./data/storage")?
            .set_default("pipeline.compiler_path", "/usr/local/bin/mindar-compiler")?
            .set_default("pipeline.compiler_max_features", 2000)?
            .set_default("pipeline.compiler_timeout_seconds", 120)?
            .set_default("pipeline.markers_workers", 2)?
            .set_default("pipeline.notifications_workers", 1)?
            .set_default("pipeline.default_queue_workers", 1)?
            .set_default("pipeline.max_retries", 5)?
            .set_default("pipeline.backoff_base_seconds", 2)?
            .set_default("pipeline.shutdown_grace_seconds", 30)?
            .set_default("scheduler.expiry_warning_hour_utc", 9)?
            .set_default("scheduler.deactivation_interval_seconds", 60)?
            .set_default("scheduler.rotation_interval_seconds", 300)?
            .set_default("credentials.refresh_lookahead_seconds", 300)?
            .set_default("credentials.refresh_tick_seconds", 60)?
            .set_default("auth.session_max_age", 60 * 60 * 24 * 7)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("ARPORTAL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))
    }
}
