use chrono::{DateTime, Utc};

/// Authentication failure sub-kinds. Each maps to its own stable error
/// token so clients can match programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    ExpiredToken,
    InvalidToken,
    InvalidCredentials,
    UserNotFound,
    UserAlreadyExists,
}

impl AuthErrorKind {
    pub fn token(&self) -> &'static str {
        match self {
            AuthErrorKind::ExpiredToken => "token_expired",
            AuthErrorKind::InvalidToken => "invalid_token",
            AuthErrorKind::InvalidCredentials => "invalid_credentials",
            AuthErrorKind::UserNotFound => "user_not_found",
            AuthErrorKind::UserAlreadyExists => "user_already_exists",
        }
    }
}

/// Shared error type used across all choir crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("auth ({}): {message}", kind.token())]
    Auth {
        kind: AuthErrorKind,
        message: String,
    },

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("missing permission: {permission}")]
    InsufficientPermission { permission: String },

    #[error("daily quota exhausted: {used}/{limit}")]
    QuotaExhausted {
        used: u64,
        limit: u64,
        reset_at: DateTime<Utc>,
    },

    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("memory ({tier}): {message}")]
    Memory { tier: String, message: String },

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("provider {provider} timed out after {seconds}s")]
    ProviderTimeout { provider: String, seconds: u64 },

    #[error("hot cache unavailable: {0}")]
    HotCacheUnavailable(String),

    #[error("database: {0}")]
    Database(String),

    #[error("plugin {plugin}: {message}")]
    Plugin { plugin: String, message: String },

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable error token for the wire envelope (`error.type`).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Json(_) => "serialization_error",
            Error::Validation(_) => "validation_error",
            Error::Auth { kind, .. } => kind.token(),
            Error::Authorization(_) => "authorization_error",
            Error::InsufficientPermission { .. } => "insufficient_permission",
            Error::QuotaExhausted { .. } => "quota_exhausted",
            Error::RateLimited { .. } => "rate_limited",
            Error::Memory { .. } => "memory_error",
            Error::Provider { .. } => "provider_error",
            Error::ProviderTimeout { .. } => "provider_timeout",
            Error::HotCacheUnavailable(_) => "hot_cache_unavailable",
            Error::Database(_) => "database_error",
            Error::Plugin { .. } => "plugin_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Shorthand for a memory-tier error.
    pub fn memory(tier: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Memory {
            tier: tier.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an authentication error.
    pub fn auth(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Error::Auth {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tokens_are_stable() {
        assert_eq!(Error::Validation("x".into()).kind(), "validation_error");
        assert_eq!(
            Error::auth(AuthErrorKind::ExpiredToken, "x").kind(),
            "token_expired"
        );
        assert_eq!(
            Error::auth(AuthErrorKind::UserAlreadyExists, "x").kind(),
            "user_already_exists"
        );
        assert_eq!(Error::RateLimited { retry_after: 3 }.kind(), "rate_limited");
        assert_eq!(Error::memory("short_term", "boom").kind(), "memory_error");
    }

    #[test]
    fn display_includes_context() {
        let err = Error::QuotaExhausted {
            used: 3,
            limit: 3,
            reset_at: Utc::now(),
        };
        assert!(err.to_string().contains("3/3"));

        let err = Error::ProviderTimeout {
            provider: "ollama".into(),
            seconds: 30,
        };
        assert!(err.to_string().contains("30s"));
    }
}
