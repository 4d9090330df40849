//! Credential store.
//!
//! Storage-connection secrets and OAuth token sets are kept encrypted at
//! rest behind a single AES-256-GCM key (nonce prepended to ciphertext,
//! base64-encoded for storage as a TEXT column).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::config::CredentialsConfig;
use crate::data::{Database, OAuthTokenSet, StorageConnection, StorageProviderKind};
use crate::error::{AppError, StorageError};

const AES_256_KEY_BYTES: usize = 32;
const AES_GCM_NONCE_BYTES: usize = 12;

/// Opaque, non-OAuth credential shape for local/S3 connections (access
/// key pairs, endpoint overrides). Stored under the same encryption as
/// `OAuthTokenSet`, distinguished only by which field set is present.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct StaticCredentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: Option<String>,
}

pub struct CredentialStore {
    cipher: Aes256Gcm,
}

impl CredentialStore {
    pub fn new(cfg: &CredentialsConfig) -> Result<Self, AppError> {
        let key = BASE64_STANDARD
            .decode(cfg.encryption_key_base64.trim())
            .map_err(|_| AppError::Config("credentials.encryption_key_base64 must be valid base64".into()))?;
        if key.len() != AES_256_KEY_BYTES {
            return Err(AppError::Config(format!(
                "credentials.encryption_key_base64 must decode to {AES_256_KEY_BYTES} bytes"
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| AppError::Config("invalid credential encryption key".into()))?;
        Ok(Self { cipher })
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<String, AppError> {
        let mut nonce_bytes = [0u8; AES_GCM_NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("credential encryption failed")))?;

        let mut out = Vec::with_capacity(AES_GCM_NONCE_BYTES + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64_STANDARD.encode(out))
    }

    fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, AppError> {
        let raw = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("stored credential is not valid base64")))?;
        if raw.len() <= AES_GCM_NONCE_BYTES {
            return Err(AppError::Internal(anyhow::anyhow!("stored credential payload too short")));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(AES_GCM_NONCE_BYTES);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("credential decryption failed")))
    }

    pub fn encrypt_oauth_tokens(&self, tokens: &OAuthTokenSet) -> Result<String, AppError> {
        let json = serde_json::to_vec(tokens).map_err(|e| AppError::Internal(e.into()))?;
        self.encrypt(&json)
    }

    pub fn decrypt_oauth_tokens(&self, encoded: &str) -> Result<OAuthTokenSet, AppError> {
        let bytes = self.decrypt(encoded)?;
        serde_json::from_slice(&bytes).map_err(|e| AppError::Internal(e.into()))
    }

    pub fn encrypt_static_credentials(&self, creds: &StaticCredentials) -> Result<String, AppError> {
        let json = serde_json::to_vec(creds).map_err(|e| AppError::Internal(e.into()))?;
        self.encrypt(&json)
    }

    pub fn decrypt_static_credentials(&self, encoded: &str) -> Result<StaticCredentials, AppError> {
        let bytes = self.decrypt(encoded)?;
        serde_json::from_slice(&bytes).map_err(|e| AppError::Internal(e.into()))
    }
}

/// A cloud-disk OAuth refresh exchange. Implemented in `oauth.rs` at the
/// API layer and injected here so the refresher stays storage-agnostic.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokenSet, StorageError>;
}

enum RefreshOutcome {
    /// Token wasn't due to expire within the lookahead window yet.
    Skipped,
    Refreshed,
}

/// A refresh attempt's failure, classified so the caller can tell a
/// transient network blip from a genuinely revoked/invalid refresh token.
/// Only the latter should mark a connection `broken`.
enum RefreshFailure {
    Transient(String),
    Permanent(String),
}

impl std::fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshFailure::Transient(msg) => write!(f, "transient: {msg}"),
            RefreshFailure::Permanent(msg) => write!(f, "permanent: {msg}"),
        }
    }
}

/// Background loop: every `refresh_tick_seconds`, refresh any cloud-disk
/// connection whose access token expires within `refresh_lookahead_seconds`
///.
pub struct Refresher {
    db: Arc<Database>,
    store: Arc<CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    lookahead: Duration,
    tick: StdDuration,
}

impl Refresher {
    pub fn new(
        db: Arc<Database>,
        store: Arc<CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        cfg: &CredentialsConfig,
    ) -> Self {
        Self {
            db,
            store,
            refresher,
            lookahead: Duration::seconds(cfg.refresh_lookahead_seconds),
            tick: StdDuration::from_secs(cfg.refresh_tick_seconds),
        }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_once().await {
                        tracing::warn!(error = %e, "credential refresh tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("credential refresher shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn tick_once(&self) -> Result<(), AppError> {
        let connections = self.db.list_storage_connections().await?;
        let now = Utc::now();
        let deadline = now + self.lookahead;

        for conn in connections {
            if StorageProviderKind::from_str(&conn.provider) != Some(StorageProviderKind::CloudDisk)
                || !conn.is_active
            {
                continue;
            }
            match self.refresh_one(&conn, deadline).await {
                Ok(RefreshOutcome::Refreshed) => {
                    crate::metrics::CREDENTIAL_REFRESHES_TOTAL.with_label_values(&["ok"]).inc();
                    if conn.test_status.as_deref() == Some("broken") {
                        self.mark_healthy(&conn).await?;
                    }
                }
                Ok(RefreshOutcome::Skipped) => {}
                Err(RefreshFailure::Transient(msg)) => {
                    tracing::warn!(connection_id = %conn.id, error = %msg, "credential refresh failed transiently, will retry next tick");
                    crate::metrics::CREDENTIAL_REFRESHES_TOTAL.with_label_values(&["error"]).inc();
                }
                Err(failure @ RefreshFailure::Permanent(_)) => {
                    tracing::warn!(connection_id = %conn.id, error = %failure, "credential refresh failed permanently, marking connection broken");
                    crate::metrics::CREDENTIAL_REFRESHES_TOTAL.with_label_values(&["error"]).inc();
                    self.mark_broken(&conn).await?;
                }
            }
        }
        Ok(())
    }

    /// Attempt one connection's refresh, classifying the failure so the
    /// caller only marks the connection `broken` on a permanent one.
    async fn refresh_one(
        &self,
        conn: &StorageConnection,
        deadline: chrono::DateTime<Utc>,
    ) -> Result<RefreshOutcome, RefreshFailure> {
        let tokens = self
            .store
            .decrypt_oauth_tokens(&conn.credentials_encrypted)
            .map_err(|e| RefreshFailure::Permanent(e.to_string()))?;
        if tokens.expires_at > deadline {
            return Ok(RefreshOutcome::Skipped);
        }

        let refreshed = self.refresher.refresh(&tokens.refresh_token).await.map_err(|e| match e {
            StorageError::Transient(msg) => RefreshFailure::Transient(msg),
            StorageError::NotFound(msg) => RefreshFailure::Transient(msg),
            StorageError::Permanent(msg) => RefreshFailure::Permanent(msg),
            StorageError::CredentialExpired => {
                RefreshFailure::Permanent("refresh token is expired or has been revoked".into())
            }
        })?;

        let encrypted = self
            .store
            .encrypt_oauth_tokens(&refreshed)
            .map_err(|e| RefreshFailure::Permanent(e.to_string()))?;
        self.db
            .update_storage_connection_credentials(conn.id, &encrypted, Utc::now())
            .await
            .map_err(|e| RefreshFailure::Transient(e.to_string()))?;
        Ok(RefreshOutcome::Refreshed)
    }

    /// Clears a `broken` connection back to healthy after a later
    /// successful refresh.
    async fn mark_healthy(&self, conn: &StorageConnection) -> Result<(), AppError> {
        self.db
            .update_storage_connection_test(conn.id, "ok", None, Utc::now())
            .await
    }

    async fn mark_broken(&self, conn: &StorageConnection) -> Result<(), AppError> {
        self.db
            .update_storage_connection_test(conn.id, "broken", Some("credential refresh failed"), Utc::now())
            .await?;

        let affected = self.db.list_companies_by_storage_connection(conn.id).await?;
        for company in affected {
            let notification = crate::data::Notification {
                id: 0,
                company_id: company.id,
                project_id: None,
                ar_content_id: None,
                kind: crate::data::NotificationKind::CredentialFailed.as_str().to_string(),
                subject: format!("Storage connection '{}' needs reauthorization", conn.name),
                message: "OAuth token refresh failed permanently; the connection is now marked broken.".to_string(),
                metadata_json: serde_json::json!({ "connection_id": conn.id }).to_string(),
                created_at: Utc::now(),
            };
            self.db.insert_notification(&notification).await?;
        }
        Ok(())
    }
}
