//! Cloud-disk storage-connection OAuth (C1/C2).
//!
//! Distinct from `auth::login`, which authenticates the platform admin:
//! this flow authorizes a cloud-disk backend (Google Drive/Dropbox-shaped
//! REST API) on a company's behalf and stores the resulting token pair as
//! a `StorageConnection`. The admin UI opens this flow in a popup and
//! listens for a `postMessage` once the callback completes.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    response::{Html, IntoResponse},
    routing::get,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, RefreshToken, Scope, TokenResponse,
    TokenUrl,
};
use serde::Deserialize;

use crate::AppState;
use crate::credentials::TokenRefresher;
use crate::data::{OAuthTokenSet, StorageConnection, StorageProviderKind};
use crate::error::{AppError, Result, StorageError};

const OAUTH_STATE_COOKIE: &str = "cloud_disk_oauth_state";

pub fn oauth_router() -> Router<AppState> {
    Router::new()
        .route("/cloud_disk/authorize", get(authorize))
        .route("/cloud_disk/callback", get(callback))
}

fn build_client(state: &AppState) -> Result<BasicClient> {
    let cfg = state
        .config
        .storage
        .oauth
        .cloud_disk
        .as_ref()
        .ok_or_else(|| AppError::Config("storage.oauth.cloud_disk is not configured".into()))?;

    let redirect_url = RedirectUrl::new(cfg.redirect_url.clone())
        .map_err(|e| AppError::Config(format!("invalid storage.oauth.cloud_disk.redirect_url: {e}")))?;
    let auth_url = AuthUrl::new(cfg.auth_url.clone())
        .map_err(|e| AppError::Config(format!("invalid storage.oauth.cloud_disk.auth_url: {e}")))?;
    let token_url = TokenUrl::new(cfg.token_url.clone())
        .map_err(|e| AppError::Config(format!("invalid storage.oauth.cloud_disk.token_url: {e}")))?;

    Ok(BasicClient::new(
        ClientId::new(cfg.client_id.clone()),
        Some(ClientSecret::new(cfg.client_secret.clone())),
        auth_url,
        Some(token_url),
    )
    .set_redirect_uri(redirect_url))
}

/// GET /oauth/cloud_disk/authorize?name=...&base_path=...
///
/// Starts the authorization-code flow. `name`/`base_path` ride through as
/// extra query params on the redirect URI's state round trip via a
/// signed-free cookie, since the provider only echoes back `state`.
async fn authorize(State(state): State<AppState>, jar: CookieJar) -> Result<impl IntoResponse> {
    let client = build_client(&state)?;
    let (auth_url, csrf_token) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("files.readwrite".to_string()))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .url();

    let secure = state.config.should_use_secure_cookies();
    let cookie = Cookie::build((OAUTH_STATE_COOKIE, csrf_token.secret().to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build();

    Ok((jar.add(cookie), axum::response::Redirect::to(auth_url.as_str())))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

/// GET /oauth/cloud_disk/callback?code&state
///
/// Exchanges the code for tokens, creates an inactive `StorageConnection`
/// row (an admin still names it and flips it active through the regular
/// CRUD endpoint), and replies with a tiny page that posts the new
/// connection id back to `window.opener` before closing itself.
async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>, jar: CookieJar) -> Result<impl IntoResponse> {
    let expected_state = jar
        .get(OAUTH_STATE_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AppError::Unauthorized)?;
    if query.state != expected_state {
        return Err(AppError::Unauthorized);
    }

    let client = build_client(&state)?;
    let token_result = client
        .exchange_code(AuthorizationCode::new(query.code))
        .request_async(async_http_client)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "cloud-disk OAuth code exchange failed");
            AppError::CredentialExpired
        })?;

    let expires_at = Utc::now()
        + chrono::Duration::seconds(token_result.expires_in().map(|d| d.as_secs() as i64).unwrap_or(3600));
    let refresh_token = token_result
        .refresh_token()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cloud-disk provider did not return a refresh token")))?;

    let tokens = OAuthTokenSet {
        access_token: token_result.access_token().secret().clone(),
        refresh_token: refresh_token.secret().clone(),
        expires_at,
    };
    let encrypted = state.credentials.encrypt_oauth_tokens(&tokens)?;

    let now = Utc::now();
    let mut connection = StorageConnection {
        id: 0,
        name: "Cloud disk connection (unnamed)".to_string(),
        provider: StorageProviderKind::CloudDisk.as_str().to_string(),
        credentials_encrypted: encrypted,
        base_path: String::new(),
        is_default: false,
        is_active: false,
        last_tested_at: None,
        test_status: None,
        test_error: None,
        created_at: now,
        updated_at: now,
    };
    connection.id = state.db.insert_storage_connection(&connection).await?;

    let secure = state.config.should_use_secure_cookies();
    let clear_state = {
        let mut cookie = Cookie::build((OAUTH_STATE_COOKIE, "".to_string())).path("/").secure(secure).build();
        cookie.make_removal();
        cookie
    };

    let connection_id = connection.id;
    Ok((
        jar.remove(clear_state),
        Html(format!(
            r#"<!DOCTYPE html>
<html><body>
<script>
  if (window.opener) {{
    window.opener.postMessage({{ type: 'storage_connection_authorized', connectionId: '{connection_id}' }}, '*');
  }}
  window.close();
</script>
Connection authorized. You may close this window.
</body></html>"#
        )),
    ))
}

type RefreshTokenError = oauth2::RequestTokenError<
    oauth2::reqwest::Error<reqwest::Error>,
    oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>,
>;

/// Classify an `oauth2` refresh failure so the caller can tell a revoked
/// or invalid refresh token (permanent, should mark the connection
/// broken) from a transport-level hiccup (transient, worth retrying).
fn classify_refresh_error(err: RefreshTokenError) -> StorageError {
    use oauth2::RequestTokenError;
    use oauth2::basic::BasicErrorResponseType;

    let message = err.to_string();
    match &err {
        RequestTokenError::ServerResponse(resp) => match resp.error() {
            BasicErrorResponseType::InvalidGrant
            | BasicErrorResponseType::InvalidClient
            | BasicErrorResponseType::UnauthorizedClient => StorageError::CredentialExpired,
            _ => StorageError::Permanent(message),
        },
        RequestTokenError::Request(_) => StorageError::Transient(message),
        RequestTokenError::Parse(..) | RequestTokenError::Other(_) => StorageError::Permanent(message),
    }
}

/// Implements credential refresh for cloud-disk connections on behalf of
/// the background `Refresher` (C2), which is storage-provider agnostic.
pub struct CloudDiskRefresher {
    config: Arc<crate::config::AppConfig>,
}

impl CloudDiskRefresher {
    pub fn new(config: Arc<crate::config::AppConfig>) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl TokenRefresher for CloudDiskRefresher {
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<OAuthTokenSet, StorageError> {
        let cfg = self
            .config
            .storage
            .oauth
            .cloud_disk
            .as_ref()
            .ok_or_else(|| StorageError::Permanent("storage.oauth.cloud_disk is not configured".into()))?;

        let auth_url = AuthUrl::new(cfg.auth_url.clone()).map_err(|e| StorageError::Permanent(e.to_string()))?;
        let token_url = TokenUrl::new(cfg.token_url.clone()).map_err(|e| StorageError::Permanent(e.to_string()))?;
        let client = BasicClient::new(
            ClientId::new(cfg.client_id.clone()),
            Some(ClientSecret::new(cfg.client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        let token_result = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                let classified = classify_refresh_error(e);
                tracing::warn!(error = %classified, "cloud-disk OAuth refresh failed");
                classified
            })?;

        let expires_at = Utc::now()
            + chrono::Duration::seconds(token_result.expires_in().map(|d| d.as_secs() as i64).unwrap_or(3600));
        let new_refresh_token = token_result
            .refresh_token()
            .map(|t| t.secret().clone())
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(OAuthTokenSet {
            access_token: token_result.access_token().secret().clone(),
            refresh_token: new_refresh_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_state_cookie_name_is_distinct_from_admin_login_csrf_cookie() {
        assert_ne!(OAUTH_STATE_COOKIE, "oauth_state");
    }
}
