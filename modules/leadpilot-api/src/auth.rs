use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use leadpilot_common::User;

use crate::error::ApiError;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "lp_session";
pub const OAUTH_COOKIE_NAME: &str = "lp_oauth";
const SESSION_DURATION_SECS: i64 = 30 * 24 * 3600;
const OAUTH_STATE_SECS: i64 = 600;

/// Signed-in user, loaded fresh from the store on every request.
pub struct CurrentUser(pub User);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let cookie_header = parts
            .headers
            .get(axum::http::header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let user_id = parse_cookie(cookie_header, COOKIE_NAME)
            .and_then(|value| verify_session(value, &state.config.session_secret))
            .ok_or(ApiError::Unauthorized)?;

        match state.store.user_by_id(user_id).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(ApiError::Unauthorized),
        }
    }
}

/// Requests from the scheduler. Requires `Authorization: Bearer <CRON_SECRET>`.
pub struct CronAuth;

impl FromRequestParts<Arc<AppState>> for CronAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if bearer_matches(header, &state.config.cron_secret) {
            Ok(CronAuth)
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

pub fn bearer_matches(header: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    match header.strip_prefix("Bearer ") {
        Some(token) => constant_time_eq(token.trim().as_bytes(), secret.as_bytes()),
        None => false,
    }
}

// --- Session cookie ---

/// Create a signed session cookie value: `user_id|expiry|signature`
pub fn create_session(user_id: Uuid, secret: &str) -> String {
    let expiry = chrono::Utc::now().timestamp() + SESSION_DURATION_SECS;
    let payload = format!("{user_id}|{expiry}");
    let sig = sign(&payload, secret);
    format!("{payload}|{sig}")
}

/// Build the Set-Cookie header value.
/// In release builds, adds `Secure` flag to prevent transmission over HTTP.
pub fn session_cookie(user_id: Uuid, secret: &str) -> String {
    let value = create_session(user_id, secret);
    format!(
        "{COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_DURATION_SECS}{}",
        secure_flag()
    )
}

pub fn clear_session_cookie() -> String {
    format!("{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Verify a session cookie value. Returns the user id if valid.
pub fn verify_session(value: &str, secret: &str) -> Option<Uuid> {
    let parts: Vec<&str> = value.splitn(3, '|').collect();
    if parts.len() != 3 {
        return None;
    }

    let (user_id, expiry_str, sig) = (parts[0], parts[1], parts[2]);

    let payload = format!("{user_id}|{expiry_str}");
    let expected_sig = sign(&payload, secret);
    if !constant_time_eq(sig.as_bytes(), expected_sig.as_bytes()) {
        return None;
    }

    let expiry: i64 = expiry_str.parse().ok()?;
    if chrono::Utc::now().timestamp() > expiry {
        return None;
    }

    user_id.parse().ok()
}

// --- OAuth state ---

/// Random, signed, expiring `state` for the Reddit authorize redirect:
/// `nonce.expiry.signature`. Also stored in a short-lived cookie so the
/// callback can check it came back to the same browser.
pub fn create_oauth_state(secret: &str) -> String {
    let nonce = hex::encode(rand::random::<[u8; 16]>());
    let expiry = chrono::Utc::now().timestamp() + OAUTH_STATE_SECS;
    let payload = format!("{nonce}.{expiry}");
    let sig = sign(&format!("oauth:{payload}"), secret);
    format!("{payload}.{sig}")
}

pub fn verify_oauth_state(state: &str, secret: &str) -> bool {
    let parts: Vec<&str> = state.splitn(3, '.').collect();
    if parts.len() != 3 {
        return false;
    }
    let payload = format!("{}.{}", parts[0], parts[1]);
    let expected = sign(&format!("oauth:{payload}"), secret);
    if !constant_time_eq(parts[2].as_bytes(), expected.as_bytes()) {
        return false;
    }
    match parts[1].parse::<i64>() {
        Ok(expiry) => chrono::Utc::now().timestamp() <= expiry,
        Err(_) => false,
    }
}

pub fn oauth_cookie(state: &str) -> String {
    format!(
        "{OAUTH_COOKIE_NAME}={state}; Path=/auth; HttpOnly; SameSite=Lax; Max-Age={OAUTH_STATE_SECS}{}",
        secure_flag()
    )
}

pub fn clear_oauth_cookie() -> String {
    format!("{OAUTH_COOKIE_NAME}=; Path=/auth; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn secure_flag() -> &'static str {
    if cfg!(debug_assertions) {
        ""
    } else {
        "; Secure"
    }
}

fn sign(payload: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Parse a specific cookie from the Cookie header string.
pub fn parse_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix(name) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value);
            }
        }
    }
    None
}
