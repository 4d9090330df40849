//! Cloud-disk storage backend (Google-Drive-style OAuth API).
//!
//! Upload is a two-step dance: request an upload session, then PUT the
//! bytes to the href the API hands back. Reads go through a fresh,
//! short-lived authenticated link minted per request — nothing here is
//! stable enough to persist, which is why `materialize_url` exists on
//! `Provider` instead of caching `upload`'s return value.
//!
//! Token refresh is C2's job (`credentials::Refresher`); this provider is
//! handed an already-valid access token for the lifetime of one
//! operation and never refreshes on its own.

use serde::Deserialize;
use std::path::Path;

use crate::error::StorageError;
use crate::storage::{ListEntry, UsageInfo};

pub struct CloudDiskProvider {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
    root_folder_id: String,
}

#[derive(Deserialize)]
struct UploadSession {
    upload_url: String,
    file_id: String,
}

#[derive(Deserialize)]
struct FileMetadata {
    id: String,
    name: String,
    is_folder: bool,
    size_bytes: Option<u64>,
    download_url: String,
}

#[derive(Deserialize)]
struct ListResponse {
    entries: Vec<FileMetadata>,
}

#[derive(Deserialize)]
struct QuotaResponse {
    used_bytes: u64,
    limit_bytes: Option<u64>,
}

impl CloudDiskProvider {
    pub fn new(api_base: String, access_token: String, root_folder_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base,
            access_token,
            root_folder_id,
        }
    }

    fn map_err(e: reqwest::Error) -> StorageError {
        if e.is_timeout() || e.is_connect() {
            StorageError::Transient(e.to_string())
        } else if matches!(e.status(), Some(s) if s.as_u16() == 401 || s.as_u16() == 403) {
            StorageError::CredentialExpired
        } else if matches!(e.status(), Some(s) if s.as_u16() == 404) {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Permanent(e.to_string())
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.access_token)
    }

    pub async fn test_connection(&self) -> Result<(), StorageError> {
        let resp = self
            .authed(self.http.get(format!("{}/about", self.api_base)))
            .send()
            .await
            .map_err(Self::map_err)?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(StorageError::CredentialExpired);
        }
        if !resp.status().is_success() {
            return Err(StorageError::Permanent(format!(
                "unexpected status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn upload(
        &self,
        local_path: &Path,
        dest_key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let session: UploadSession = self
            .authed(self.http.post(format!("{}/files/upload-session", self.api_base)))
            .json(&serde_json::json!({
                "parent_id": self.root_folder_id,
                "name": dest_key,
                "content_type": content_type,
            }))
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)?;

        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::Permanent(format!("read source failed: {e}")))?;

        self.http
            .put(&session.upload_url)
            .header("content-type", content_type)
            .body(data)
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?;

        self.fresh_url(&session.file_id).await
    }

    pub async fn download(&self, src_key: &str, local_path: &Path) -> Result<(), StorageError> {
        let url = self.fresh_url(src_key).await?;
        let bytes = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?
            .bytes()
            .await
            .map_err(Self::map_err)?;

        tokio::fs::write(local_path, &bytes)
            .await
            .map_err(|e| StorageError::Transient(format!("write failed: {e}")))?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let resp = self
            .authed(self.http.delete(format!("{}/files/{}", self.api_base, key)))
            .send()
            .await
            .map_err(Self::map_err)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status().map_err(Self::map_err)?;
        Ok(())
    }

    /// Cloud-disk `list` is directory-only: used for the storage-connection
    /// folder picker in the admin UI, never for pagination over content.
    pub async fn list(&self, folder: &str, _recursive: bool) -> Result<Vec<ListEntry>, StorageError> {
        let folder_id = if folder.is_empty() { &self.root_folder_id } else { folder };
        let resp: ListResponse = self
            .authed(self.http.get(format!("{}/files/{}/children", self.api_base, folder_id)))
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)?;

        Ok(resp
            .entries
            .into_iter()
            .filter(|e| e.is_folder)
            .map(|e| ListEntry { key: e.id, is_dir: true, size_bytes: e.size_bytes })
            .collect())
    }

    pub async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        self.authed(self.http.post(format!("{}/files/folders", self.api_base)))
            .json(&serde_json::json!({
                "parent_id": self.root_folder_id,
                "name": path,
            }))
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?;
        Ok(())
    }

    pub async fn usage(&self, _path: &str) -> Result<UsageInfo, StorageError> {
        let quota: QuotaResponse = self
            .authed(self.http.get(format!("{}/about/quota", self.api_base)))
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)?;

        Ok(UsageInfo { used_bytes: quota.used_bytes, quota_bytes: quota.limit_bytes })
    }

    /// Mint a short-lived authenticated download link for `key`. Must not
    /// be cached by callers.
    pub async fn fresh_url(&self, key: &str) -> Result<String, StorageError> {
        let meta: FileMetadata = self
            .authed(self.http.get(format!("{}/files/{}", self.api_base, key)))
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)?;

        let _ = meta.name;
        let _ = meta.id;
        Ok(meta.download_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// `fresh_url` never caches: two calls for the same key must hit the
    /// provider again and can come back with two different links.
    #[tokio::test]
    async fn fresh_url_returns_whatever_the_provider_says_on_each_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files/marker-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "marker-123",
                "name": "marker.mind",
                "is_folder": false,
                "size_bytes": 4096,
                "download_url": "https://cdn.example.test/marker-123?sig=first",
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/marker-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "marker-123",
                "name": "marker.mind",
                "is_folder": false,
                "size_bytes": 4096,
                "download_url": "https://cdn.example.test/marker-123?sig=second",
            })))
            .mount(&mock_server)
            .await;

        let provider = CloudDiskProvider::new(mock_server.uri(), "test-access-token".to_string(), "root".to_string());

        let first = provider.fresh_url("marker-123").await.unwrap();
        let second = provider.fresh_url("marker-123").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(first, "https://cdn.example.test/marker-123?sig=first");
        assert_eq!(second, "https://cdn.example.test/marker-123?sig=second");
    }

    #[tokio::test]
    async fn fresh_url_maps_an_unauthorized_response_to_credential_expired() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/marker-123"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let provider = CloudDiskProvider::new(mock_server.uri(), "stale-token".to_string(), "root".to_string());
        let err = provider.fresh_url("marker-123").await.unwrap_err();
        assert!(matches!(err, StorageError::CredentialExpired));
    }
}
