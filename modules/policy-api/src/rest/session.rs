use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use super::extract::JsonBody;
use crate::auth::{self, UserSession, LOGIN_RATE_LIMIT_PER_HOUR};
use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

pub async fn api_login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> Result<Response, ApiError> {
    {
        let mut limiter = state.rate_limiter.lock().await;
        if !auth::check_login_rate(
            &mut limiter,
            addr.ip(),
            Instant::now(),
            LOGIN_RATE_LIMIT_PER_HOUR,
        ) {
            warn!(ip = %addr.ip(), "Login rate limit hit");
            return Err(ApiError::TooManyRequests);
        }
    }

    let username = body.username.trim();
    let Some(user) = state.config.authenticate(username, &body.password) else {
        // Don't log the attempted username; it may be a mistyped password.
        info!("Rejected login attempt");
        return Err(ApiError::BadRequest("用户名或密码错误".to_string()));
    };

    let token = state.sessions.create_token(&user.username)?;
    info!(user = %user.username, "User signed in");

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, auth::session_cookie(&token))],
        Json(serde_json::json!({ "username": user.username })),
    )
        .into_response())
}

pub async fn api_logout() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, auth::clear_session_cookie())],
    )
}

pub async fn api_me(session: UserSession) -> impl IntoResponse {
    Json(serde_json::json!({ "username": session.username }))
}
