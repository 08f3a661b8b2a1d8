//! Authentication endpoints.
//!
//! - `POST   /api/v1/auth/register`        — create an account
//! - `POST   /api/v1/auth/login`           — issue access + refresh tokens
//! - `POST   /api/v1/auth/refresh`         — mint a new access token
//! - `GET    /api/v1/auth/me`              — current profile
//! - `POST   /api/v1/auth/logout`          — invalidate the refresh token
//! - `POST   /api/v1/auth/change-password`
//! - `DELETE /api/v1/auth/users/:id`       — admin: remove user + owned data

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::Extension;
use serde::Deserialize;
use serde_json::json;

use choir_domain::error::Error;

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::dispatch::RouteClass;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current: String,
    pub new: String,
}

pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .rate_limiter
        .check(RouteClass::Register, &addr.ip().to_string())?;

    let profile = state
        .auth
        .register(&body.username, &body.email, &body.password)
        .inspect_err(|e| state.metrics.record_error(e.kind()))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user_id": profile.user_id,
            "username": profile.username,
            "email": profile.email,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .rate_limiter
        .check(RouteClass::Login, &addr.ip().to_string())?;

    let outcome = state
        .auth
        .login(&body.email, &body.password)
        .await
        .inspect_err(|e| state.metrics.record_error(e.kind()))?;
    state.metrics.record_session_start();

    Ok(Json(serde_json::to_value(&outcome).map_err(Error::from)?))
}

pub async fn refresh(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .rate_limiter
        .check(RouteClass::Refresh, &addr.ip().to_string())?;

    let (access_token, expires_in) = state.auth.refresh(&body.refresh_token).await?;
    Ok(Json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    })))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.auth.store().get(&user.user_id).ok_or_else(|| {
        Error::auth(
            choir_domain::error::AuthErrorKind::UserNotFound,
            "profile vanished",
        )
    })?;
    Ok(Json(serde_json::to_value(choir_auth::PublicProfile::from(&record)).map_err(Error::from)?))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.auth.logout(&user.user_id).await;
    state.metrics.record_session_end();
    Ok(Json(json!({ "status": "logged_out" })))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .rate_limiter
        .check(RouteClass::ChangePassword, &user.user_id)?;

    state
        .auth
        .change_password(&user.user_id, &body.current, &body.new)
        .inspect_err(|e| state.metrics.record_error(e.kind()))?;
    Ok(Json(json!({ "status": "password_changed" })))
}

/// Remove a user and purge everything they own: session mappings, memory
/// records, quota counters, cached tokens.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.auth.delete_user(&user_id).await?;
    if !removed {
        return Err(Error::Validation(format!("no user \"{user_id}\"")).into());
    }

    for internal_id in state.session_map.remove_user(&user_id) {
        state.memory.clear_session(&internal_id).await?;
    }
    state.quota.forget(&user_id);

    Ok(Json(json!({ "status": "deleted", "user_id": user_id })))
}
