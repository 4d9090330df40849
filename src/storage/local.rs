//! Local filesystem storage backend.
//!
//! Used for the seeded default connection and for
//! self-hosted deployments that never configure S3 or cloud-disk
//! credentials. Files are served from `public_base_url` by a static-file
//! route mounted over `local_base_path`.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;
use crate::storage::{ListEntry, UsageInfo};

pub struct LocalProvider {
    base_path: PathBuf,
    public_base_url: String,
}

impl LocalProvider {
    pub fn new(base_path: PathBuf, public_base_url: String) -> Self {
        Self { base_path, public_base_url }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.base_path.join(key.trim_start_matches('/'))
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/media/{}", self.public_base_url.trim_end_matches('/'), key.trim_start_matches('/'))
    }

    pub async fn test_connection(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| StorageError::Permanent(format!("base path not writable: {e}")))?;
        let probe = self.base_path.join(".write_probe");
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(|e| StorageError::Permanent(format!("base path not writable: {e}")))?;
        let _ = tokio::fs::remove_file(&probe).await;
        Ok(())
    }

    pub async fn upload(
        &self,
        local_path: &Path,
        dest_key: &str,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let dest = self.resolve(dest_key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Transient(format!("mkdir failed: {e}")))?;
        }

        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::Permanent(format!("read source failed: {e}")))?;

        // Write to a temp file then rename so concurrent readers never see
        // a partially-written object.
        let tmp_path = dest.with_extension(format!(
            "{}.tmp",
            dest.extension().and_then(|e| e.to_str()).unwrap_or("upload")
        ));
        {
            let mut file = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(|e| StorageError::Transient(format!("create temp file failed: {e}")))?;
            file.write_all(&data)
                .await
                .map_err(|e| StorageError::Transient(format!("write failed: {e}")))?;
            file.flush()
                .await
                .map_err(|e| StorageError::Transient(format!("flush failed: {e}")))?;
        }
        tokio::fs::rename(&tmp_path, &dest)
            .await
            .map_err(|e| StorageError::Transient(format!("rename failed: {e}")))?;

        Ok(self.public_url(dest_key))
    }

    pub async fn download(&self, src_key: &str, local_path: &Path) -> Result<(), StorageError> {
        let src = self.resolve(src_key);
        tokio::fs::copy(&src, local_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(src_key.to_string())
            } else {
                StorageError::Transient(format!("copy failed: {e}"))
            }
        })?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Transient(format!("delete failed: {e}"))),
        }
    }

    pub async fn list(&self, folder: &str, recursive: bool) -> Result<Vec<ListEntry>, StorageError> {
        let root = self.resolve(folder);
        let mut out = Vec::new();
        let mut stack = vec![root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Transient(format!("read_dir failed: {e}"))),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::Transient(format!("read_dir entry failed: {e}")))?
            {
                let path = entry.path();
                let rel = path
                    .strip_prefix(&self.base_path)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| StorageError::Transient(format!("stat failed: {e}")))?;
                let is_dir = meta.is_dir();
                if is_dir && recursive {
                    stack.push(path.clone());
                }
                out.push(ListEntry {
                    key: rel,
                    is_dir,
                    size_bytes: if is_dir { None } else { Some(meta.len()) },
                });
            }
        }

        Ok(out)
    }

    pub async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.resolve(path))
            .await
            .map_err(|e| StorageError::Transient(format!("mkdir failed: {e}")))
    }

    pub async fn usage(&self, path: &str) -> Result<UsageInfo, StorageError> {
        let entries = self.list(path, true).await?;
        let used_bytes = entries.iter().filter_map(|e| e.size_bytes).sum();
        Ok(UsageInfo { used_bytes, quota_bytes: None })
    }
}
