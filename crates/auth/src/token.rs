//! Signed token envelopes (HS256).
//!
//! Two token types: short-lived access tokens (~1 hour) for API calls and
//! long-lived refresh tokens (~30 days) for minting new access tokens.
//! Verification rejects expired, malformed, and wrong-type tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use choir_domain::error::{AuthErrorKind, Error, Result};

use crate::roles::Role;

/// Minimum signing-secret length in bytes.
const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// The claims carried by every token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user id.
    pub sub: String,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expires-at (unix seconds).
    pub exp: i64,
    /// Access or refresh.
    pub token_type: TokenType,
    /// Roles snapshot at issue time.
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Unique nonce, so two tokens issued in the same second differ.
    pub jti: String,
}

pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenManager {
    pub fn new(secret: &[u8], access_ttl_secs: u64, refresh_ttl_secs: u64) -> Result<Self> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(Error::Validation(format!(
                "token secret must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl: Duration::seconds(access_ttl_secs as i64),
            refresh_ttl: Duration::seconds(refresh_ttl_secs as i64),
        })
    }

    pub fn issue_access(&self, user_id: &str, roles: &[Role]) -> Result<String> {
        self.issue(user_id, roles, TokenType::Access, self.access_ttl)
    }

    pub fn issue_refresh(&self, user_id: &str) -> Result<String> {
        self.issue(user_id, &[], TokenType::Refresh, self.refresh_ttl)
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl.num_seconds().max(0) as u64
    }

    fn issue(
        &self,
        user_id: &str,
        roles: &[Role],
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: user_id.to_owned(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type,
            roles: roles.to_vec(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("token encoding failed: {e}")))
    }

    /// Verify signature, expiry, and type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<TokenClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::auth(AuthErrorKind::ExpiredToken, "token has expired")
                }
                _ => Error::auth(AuthErrorKind::InvalidToken, format!("invalid token: {e}")),
            }
        })?;

        if data.claims.token_type != expected {
            return Err(Error::auth(
                AuthErrorKind::InvalidToken,
                "wrong token type for this operation",
            ));
        }
        Ok(data.claims)
    }
}
