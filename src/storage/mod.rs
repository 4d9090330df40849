//! Storage providers.
//!
//! A single capability interface — upload, download, delete, list,
//! create-folder, test, usage, plus materialize-url for ephemeral-URL
//! backends — implemented by tagged variants of one closed enum. No trait
//! objects and no runtime reflection: every operation is a `match` that
//! dispatches to the concrete backend.

mod cloud_disk;
mod local;
mod s3;

pub use cloud_disk::CloudDiskProvider;
pub use local::LocalProvider;
pub use s3::S3Provider;

use crate::config::StorageConfig;
use crate::credentials::CredentialStore;
use crate::data::{StorageConnection, StorageProviderKind};
use crate::error::{AppError, StorageError};

/// A directory or file entry returned by `list`.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub key: String,
    pub is_dir: bool,
    pub size_bytes: Option<u64>,
}

/// Result of `usage`.
#[derive(Debug, Clone, Copy)]
pub struct UsageInfo {
    pub used_bytes: u64,
    pub quota_bytes: Option<u64>,
}

/// Result of `test_connection`.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub ok: bool,
    pub latency_ms: u64,
    pub err: Option<String>,
}

/// Subfolders created under a company's `storage_path` at onboarding
///.
pub const COMPANY_SUBFOLDERS: [&str; 4] = ["markers", "videos", "thumbnails", "content"];

/// A configured storage backend. Local and S3 provide stable URLs that
/// callers may cache; cloud-disk URLs are ephemeral and must be re-minted
/// at read time via `materialize_url`.
pub enum Provider {
    Local(LocalProvider),
    S3(S3Provider),
    CloudDisk(CloudDiskProvider),
}

impl Provider {
    pub fn kind(&self) -> StorageProviderKind {
        match self {
            Provider::Local(_) => StorageProviderKind::Local,
            Provider::S3(_) => StorageProviderKind::S3,
            Provider::CloudDisk(_) => StorageProviderKind::CloudDisk,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            Provider::Local(_) => "local",
            Provider::S3(_) => "s3",
            Provider::CloudDisk(_) => "cloud_disk",
        }
    }

    fn observe(&self, operation: &str, ok: bool) {
        crate::metrics::STORAGE_OPERATIONS_TOTAL
            .with_label_values(&[self.metric_label(), operation, if ok { "ok" } else { "error" }])
            .inc();
    }

    pub async fn test_connection(&self) -> TestResult {
        let started = std::time::Instant::now();
        let result = match self {
            Provider::Local(p) => p.test_connection().await,
            Provider::S3(p) => p.test_connection().await,
            Provider::CloudDisk(p) => p.test_connection().await,
        };
        self.observe("test", result.is_ok());
        match result {
            Ok(()) => TestResult {
                ok: true,
                latency_ms: started.elapsed().as_millis() as u64,
                err: None,
            },
            Err(e) => TestResult {
                ok: false,
                latency_ms: started.elapsed().as_millis() as u64,
                err: Some(e.to_string()),
            },
        }
    }

    pub async fn upload(
        &self,
        local_path: &std::path::Path,
        dest_key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let result = match self {
            Provider::Local(p) => p.upload(local_path, dest_key, content_type).await,
            Provider::S3(p) => p.upload(local_path, dest_key, content_type).await,
            Provider::CloudDisk(p) => p.upload(local_path, dest_key, content_type).await,
        };
        self.observe("upload", result.is_ok());
        result
    }

    pub async fn download(
        &self,
        src_key: &str,
        local_path: &std::path::Path,
    ) -> Result<(), StorageError> {
        let result = match self {
            Provider::Local(p) => p.download(src_key, local_path).await,
            Provider::S3(p) => p.download(src_key, local_path).await,
            Provider::CloudDisk(p) => p.download(src_key, local_path).await,
        };
        self.observe("download", result.is_ok());
        result
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let result = match self {
            Provider::Local(p) => p.delete(key).await,
            Provider::S3(p) => p.delete(key).await,
            Provider::CloudDisk(p) => p.delete(key).await,
        };
        self.observe("delete", result.is_ok());
        result
    }

    pub async fn list(&self, folder: &str, recursive: bool) -> Result<Vec<ListEntry>, StorageError> {
        let result = match self {
            Provider::Local(p) => p.list(folder, recursive).await,
            Provider::S3(p) => p.list(folder, recursive).await,
            Provider::CloudDisk(p) => p.list(folder, recursive).await,
        };
        self.observe("list", result.is_ok());
        result
    }

    pub async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        let result = match self {
            Provider::Local(p) => p.create_folder(path).await,
            Provider::S3(p) => p.create_folder(path).await,
            Provider::CloudDisk(p) => p.create_folder(path).await,
        };
        self.observe("create_folder", result.is_ok());
        result
    }

    pub async fn usage(&self, path: &str) -> Result<UsageInfo, StorageError> {
        let result = match self {
            Provider::Local(p) => p.usage(path).await,
            Provider::S3(p) => p.usage(path).await,
            Provider::CloudDisk(p) => p.usage(path).await,
        };
        self.observe("usage", result.is_ok());
        result
    }

    /// Mint a fresh URL for `key`. Stable for local/S3; a new short-lived
    /// URL for cloud-disk backends. C6 must call this at read time and
    /// must never persist the cloud-disk result.
    pub async fn materialize_url(&self, key: &str) -> Result<String, StorageError> {
        let result = match self {
            Provider::Local(p) => Ok(p.public_url(key)),
            Provider::S3(p) => p.presigned_url(key).await,
            Provider::CloudDisk(p) => p.fresh_url(key).await,
        };
        self.observe("materialize_url", result.is_ok());
        result
    }

    /// Create the standard company subfolders. Failure here is non-fatal
    /// for company creation; callers set `storage_status = degraded`.
    pub async fn bootstrap_company_folders(&self, storage_path: &str) -> Result<(), StorageError> {
        for sub in COMPANY_SUBFOLDERS {
            self.create_folder(&format!("{storage_path}/{sub}")).await?;
        }
        Ok(())
    }
}

/// Build the concrete `Provider` for a `StorageConnection`, decrypting
/// whatever credential shape its `provider` kind expects. Centralizing
/// this dispatch keeps C3/C4/C5 from ever matching on
/// `StorageProviderKind` themselves.
pub fn build_provider(
    connection: &StorageConnection,
    store: &CredentialStore,
    cfg: &StorageConfig,
    public_base_url: &str,
) -> Result<Provider, AppError> {
    let kind = StorageProviderKind::from_str(&connection.provider)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown storage provider kind '{}'", connection.provider)))?;

    match kind {
        StorageProviderKind::Local => Ok(Provider::Local(LocalProvider::new(
            cfg.local_base_path.join(&connection.base_path),
            public_base_url.to_string(),
        ))),
        StorageProviderKind::S3 => {
            let creds = store.decrypt_static_credentials(&connection.credentials_encrypted)?;
            let access_key_id = creds
                .access_key_id
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("S3 connection missing access_key_id")))?;
            let secret_access_key = creds
                .secret_access_key
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("S3 connection missing secret_access_key")))?;
            let bucket = creds
                .bucket
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("S3 connection missing bucket")))?;
            let endpoint = cfg
                .s3
                .endpoint
                .clone()
                .ok_or_else(|| AppError::Config("storage.s3.endpoint is required for S3 connections".into()))?;
            let region = cfg.s3.region.clone().unwrap_or_else(|| "auto".to_string());
            Ok(Provider::S3(S3Provider::new(
                &endpoint,
                &region,
                &access_key_id,
                &secret_access_key,
                bucket,
                connection.base_path.clone(),
                cfg.s3.presign_expiry_seconds,
            )))
        }
        StorageProviderKind::CloudDisk => {
            let tokens = store.decrypt_oauth_tokens(&connection.credentials_encrypted)?;
            let oauth_cfg = cfg
                .oauth
                .cloud_disk
                .as_ref()
                .ok_or_else(|| AppError::Config("storage.oauth.cloud_disk is not configured".into()))?;
            Ok(Provider::CloudDisk(CloudDiskProvider::new(
                oauth_cfg.api_base.clone(),
                tokens.access_token,
                connection.base_path.clone(),
            )))
        }
    }
}
