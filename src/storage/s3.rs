//! S3-compatible storage backend.
//!
//! Works against AWS S3 and any S3-compatible provider (R2, MinIO,
//! Backblaze B2) configured with an explicit endpoint URL. Bucket and
//! credentials are connection-scoped, pulled from the credential store
//! per request rather than fixed at process startup.

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use std::time::Duration;

use crate::error::StorageError;
use crate::storage::{ListEntry, UsageInfo};

pub struct S3Provider {
    client: S3Client,
    bucket: String,
    base_path: String,
    presign_expiry: Duration,
}

impl S3Provider {
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
        bucket: String,
        base_path: String,
        presign_expiry_seconds: u64,
    ) -> Self {
        use aws_config::BehaviorVersion;

        let credentials = Credentials::new(access_key_id, secret_access_key, None, None, "arportal");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .build();

        Self {
            client: S3Client::from_conf(config),
            bucket,
            base_path,
            presign_expiry: Duration::from_secs(presign_expiry_seconds),
        }
    }

    fn full_key(&self, key: &str) -> String {
        let trimmed = key.trim_start_matches('/');
        if self.base_path.is_empty() {
            trimmed.to_string()
        } else {
            format!("{}/{}", self.base_path.trim_end_matches('/'), trimmed)
        }
    }

    fn map_err(key: &str, e: impl std::fmt::Display) -> StorageError {
        let msg = e.to_string();
        if msg.contains("NoSuchKey") || msg.contains("NotFound") {
            StorageError::NotFound(key.to_string())
        } else if msg.contains("timeout") || msg.contains("connection") || msg.contains("dispatch failure") {
            StorageError::Transient(msg)
        } else if msg.contains("InvalidAccessKeyId")
            || msg.contains("SignatureDoesNotMatch")
            || msg.contains("ExpiredToken")
        {
            StorageError::CredentialExpired
        } else {
            StorageError::Permanent(msg)
        }
    }

    pub async fn test_connection(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| Self::map_err(&self.bucket, e))?;
        Ok(())
    }

    pub async fn upload(
        &self,
        local_path: &Path,
        dest_key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Permanent(format!("read source failed: {e}")))?;

        let key = self.full_key(dest_key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Self::map_err(&key, e))?;

        self.presigned_url(dest_key).await
    }

    pub async fn download(&self, src_key: &str, local_path: &Path) -> Result<(), StorageError> {
        let key = self.full_key(src_key);
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Self::map_err(&key, e))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("stream read failed: {e}")))?
            .into_bytes();

        tokio::fs::write(local_path, data)
            .await
            .map_err(|e| StorageError::Transient(format!("write failed: {e}")))?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let full_key = self.full_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::map_err(&full_key, e))?;
        Ok(())
    }

    pub async fn list(&self, folder: &str, recursive: bool) -> Result<Vec<ListEntry>, StorageError> {
        let prefix = self.full_key(folder);
        let delimiter = if recursive { None } else { Some("/") };

        let mut out = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(&prefix);
            if let Some(d) = delimiter {
                req = req.delimiter(d);
            }
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(|e| Self::map_err(&prefix, e))?;

            for common in resp.common_prefixes() {
                if let Some(p) = common.prefix() {
                    out.push(ListEntry { key: p.to_string(), is_dir: true, size_bytes: None });
                }
            }
            for obj in resp.contents() {
                if let Some(k) = obj.key() {
                    out.push(ListEntry {
                        key: k.to_string(),
                        is_dir: false,
                        size_bytes: obj.size().map(|s| s.max(0) as u64),
                    });
                }
            }

            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(out)
    }

    /// S3 has no real directories; a zero-byte key with a trailing slash
    /// is the closest convention and is what most S3 consoles render as
    /// a folder.
    pub async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        let key = format!("{}/", self.full_key(path).trim_end_matches('/'));
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .map_err(|e| Self::map_err(&key, e))?;
        Ok(())
    }

    pub async fn usage(&self, path: &str) -> Result<UsageInfo, StorageError> {
        let entries = self.list(path, true).await?;
        let used_bytes = entries.iter().filter_map(|e| e.size_bytes).sum();
        Ok(UsageInfo { used_bytes, quota_bytes: None })
    }

    pub async fn presigned_url(&self, key: &str) -> Result<String, StorageError> {
        let full_key = self.full_key(key);
        let presign_config = PresigningConfig::expires_in(self.presign_expiry)
            .map_err(|e| StorageError::Permanent(format!("invalid presign expiry: {e}")))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .presigned(presign_config)
            .await
            .map_err(|e| Self::map_err(&full_key, e))?;

        Ok(presigned.uri().to_string())
    }
}
