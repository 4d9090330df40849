//! Static-credential admin login.
//!
//! Single admin role: one configured username/password pair is compared
//! against the login request and, on a match, a signed session cookie is
//! minted. Distinct from `api::oauth`, which authorizes a cloud-disk
//! storage connection on a company's behalf rather than an admin session.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::AppState;
use crate::auth::session::{Session, create_session_token};
use crate::error::AppError;

const SESSION_COOKIE: &str = "session";

/// Login/logout router.
///
/// Routes:
/// - POST /login - exchange the admin username/password for a session cookie
/// - POST /logout - clear the session cookie
pub fn auth_router() -> Router<AppState> {
    Router::new().route("/login", post(login)).route("/logout", post(logout))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// POST /login
///
/// Both fields are compared in constant time so a response-time side
/// channel can't be used to narrow down the password byte by byte.
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username_matches =
        constant_time_eq(body.username.as_bytes(), state.config.auth.admin_username.as_bytes());
    let password_matches =
        constant_time_eq(body.password.as_bytes(), state.config.auth.admin_password.as_bytes());
    if !(username_matches & password_matches) {
        tracing::warn!(attempted_user = %body.username, "rejected admin login attempt");
        return Err(AppError::Unauthorized);
    }

    let now = Utc::now();
    let session = Session {
        username: state.config.auth.admin_username.clone(),
        created_at: now,
        expires_at: now + Duration::seconds(state.config.auth.session_max_age),
    };
    let session_token = create_session_token(&session, &state.config.auth.session_secret)?;
    let secure_cookies = state.config.should_use_secure_cookies();
    let cookie = build_session_cookie(&session_token, secure_cookies);

    Ok((jar.add(cookie), Json(serde_json::json!({ "ok": true }))))
}

/// POST /logout
async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let secure_cookies = state.config.should_use_secure_cookies();
    (jar.remove(clear_session_cookie(secure_cookies)), Json(serde_json::json!({ "ok": true })))
}

fn build_session_cookie(session_token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_token.to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build((SESSION_COOKIE, "".to_string())).path("/").http_only(true).secure(secure).build();
    cookie.make_removal();
    cookie
}

/// Byte-for-byte equality that always inspects every byte of both slices
/// rather than short-circuiting on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_accepts_identical_bytes() {
        assert!(constant_time_eq(b"admin", b"admin"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_bytes() {
        assert!(!constant_time_eq(b"admin", b"wrong"));
    }

    #[test]
    fn constant_time_eq_rejects_different_lengths() {
        assert!(!constant_time_eq(b"admin", b"administrator"));
    }

    #[test]
    fn build_session_cookie_sets_secure_attributes() {
        let cookie = build_session_cookie("token", true);
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }
}
