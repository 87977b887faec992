use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

const TOKEN_DURATION_SECS: i64 = 24 * 3600; // 24 hours
const COOKIE_NAME: &str = "pd_session";
const ISSUER: &str = "policydiff";
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(3600);

/// Max login attempts per IP per hour.
pub const LOGIN_RATE_LIMIT_PER_HOUR: usize = 10;

/// JWT claims stored in the session cookie.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub jti: String,
}

/// Creates and verifies session tokens.
#[derive(Clone)]
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SessionService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn create_token(&self, username: &str) -> Result<String> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::seconds(TOKEN_DURATION_SECS);

        let claims = Claims {
            sub: username.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(Into::into)
    }

    /// Returns claims if the token is well-signed and not expired.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(Into::into)
    }
}

/// Signed-in user. Extract this in handlers that require auth.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub username: String,
}

impl FromRequestParts<Arc<AppState>> for UserSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let from_cookie = parts
            .headers
            .get(axum::http::header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_session_cookie);
        let from_bearer = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let token = from_cookie.or(from_bearer).ok_or(ApiError::Unauthorized)?;
        let claims = state
            .sessions
            .verify_token(token)
            .map_err(|_| ApiError::Unauthorized)?;

        // A user removed from the table loses access even with a live token.
        if !state.config.users.iter().any(|u| u.username == claims.sub) {
            return Err(ApiError::Unauthorized);
        }

        Ok(UserSession {
            username: claims.sub,
        })
    }
}

/// Build the Set-Cookie header value.
/// In release builds, adds `Secure` flag to prevent transmission over HTTP.
pub fn session_cookie(token: &str) -> String {
    let secure = if cfg!(debug_assertions) { "" } else { "; Secure" };
    format!(
        "{COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={TOKEN_DURATION_SECS}{secure}"
    )
}

/// Build a Set-Cookie header that clears the session.
pub fn clear_session_cookie() -> String {
    format!("{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Parse the session cookie value from a Cookie header string.
pub fn parse_session_cookie(header: &str) -> Option<&str> {
    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix(COOKIE_NAME) {
            if let Some(value) = value.strip_prefix('=') {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Check rate limit for one client. Returns true if the request is allowed.
/// Prunes expired entries and records the new request if allowed.
pub fn check_rate_limit(entries: &mut Vec<Instant>, now: Instant, max_per_hour: usize) -> bool {
    let cutoff = now.checked_sub(RATE_LIMIT_WINDOW);
    entries.retain(|t| cutoff.map_or(true, |c| *t > c));
    if entries.len() >= max_per_hour {
        return false;
    }
    entries.push(now);
    true
}

/// Check and record a login attempt from `ip`. Clients whose attempts have all
/// aged out of the window are dropped so the table does not grow without bound.
pub fn check_login_rate(
    limiter: &mut HashMap<IpAddr, Vec<Instant>>,
    ip: IpAddr,
    now: Instant,
    max_per_hour: usize,
) -> bool {
    if let Some(cutoff) = now.checked_sub(RATE_LIMIT_WINDOW) {
        limiter.retain(|_, entries| entries.iter().any(|t| *t > cutoff));
    }
    check_rate_limit(limiter.entry(ip).or_default(), now, max_per_hour)
}
