//! The wire error envelope.
//!
//! Every non-2xx JSON response is `{"error": {"type", "message",
//! "details"?}}` where `type` is the stable token from
//! [`choir_domain::Error::kind`]. 429 responses carry a `Retry-After`
//! header.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::{json, Value};

use choir_domain::error::{AuthErrorKind, Error};

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;

        let (status, details, retry_after): (StatusCode, Option<Value>, Option<u64>) = match &err
        {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, None, None),
            Error::Auth { kind, .. } => {
                let status = match kind {
                    AuthErrorKind::UserAlreadyExists => StatusCode::BAD_REQUEST,
                    _ => StatusCode::UNAUTHORIZED,
                };
                (status, None, None)
            }
            Error::Authorization(_) | Error::InsufficientPermission { .. } => {
                (StatusCode::FORBIDDEN, None, None)
            }
            Error::QuotaExhausted {
                used,
                limit,
                reset_at,
            } => {
                let retry_after = (*reset_at - Utc::now()).num_seconds().max(1) as u64;
                let details = json!({
                    "retry_after": retry_after,
                    "quota_info": {
                        "used": used,
                        "limit": limit,
                        "remaining": 0,
                        "reset_at": reset_at,
                    },
                });
                (StatusCode::TOO_MANY_REQUESTS, Some(details), Some(retry_after))
            }
            Error::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                Some(json!({ "retry_after": retry_after })),
                Some(*retry_after),
            ),
            Error::Memory { .. }
            | Error::Provider { .. }
            | Error::ProviderTimeout { .. }
            | Error::HotCacheUnavailable(_)
            | Error::Database(_) => (StatusCode::SERVICE_UNAVAILABLE, None, None),
            Error::Plugin { .. } | Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None, None)
            }
        };

        let mut body = json!({
            "error": {
                "type": err.kind(),
                "message": err.to_string(),
            }
        });
        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from(secs));
        }
        response
    }
}
