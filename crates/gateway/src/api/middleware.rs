//! Request authentication and authorization middleware.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use choir_auth::{Role, UserRecord};
use choir_domain::error::{AuthErrorKind, Error};

use crate::api::error::ApiError;
use crate::dispatch::Caller;
use crate::state::AppState;

/// The verified caller, inserted into request extensions by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<Role>,
    pub quota_limit: Option<u64>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    pub fn caller(&self) -> Caller {
        Caller {
            user_id: self.user_id.clone(),
            quota_limit: self.quota_limit,
        }
    }
}

impl From<&UserRecord> for AuthUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            roles: user.roles.clone(),
            quota_limit: user.quota_limit,
        }
    }
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Enforce `Authorization: Bearer <access_token>` and attach the verified
/// user to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = match bearer_token(&req) {
        Some(token) => token,
        None => {
            return ApiError(Error::auth(
                AuthErrorKind::InvalidToken,
                "missing bearer token",
            ))
            .into_response();
        }
    };

    let user = match state.auth.verify_access(token) {
        Ok(user) => user,
        Err(e) => {
            state.metrics.record_error(e.kind());
            return ApiError(e).into_response();
        }
    };

    req.extensions_mut().insert(AuthUser::from(&user));
    next.run(req).await
}

/// Restrict a route to admins. Must run after [`require_auth`].
pub async fn require_admin(req: Request<Body>, next: Next) -> Response {
    let is_admin = req
        .extensions()
        .get::<AuthUser>()
        .is_some_and(AuthUser::is_admin);
    if !is_admin {
        return ApiError(Error::Authorization("admin role required".into())).into_response();
    }
    next.run(req).await
}
