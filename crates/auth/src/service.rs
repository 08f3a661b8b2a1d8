//! The auth service: registration, login, token refresh, logout, password
//! change, and user deletion.
//!
//! The refresh-token cache is advisory state: it lives in the hot cache
//! when one is configured (so restarts and replicas agree) and always in a
//! process-local map. Login and refresh cross-check the cached copy when
//! present; a dead cache never blocks authentication.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use choir_domain::error::{AuthErrorKind, Error, Result};
use choir_domain::trace::TraceEvent;
use choir_domain::validate;
use choir_memory::HotCache;

use crate::password::PasswordHasher;
use crate::roles::Role;
use crate::store::{UserRecord, UserStore};
use crate::token::{TokenManager, TokenType};

fn refresh_cache_key(user_id: &str) -> String {
    format!("auth:refresh:{user_id}")
}

/// Constant-time token comparison via SHA-256 digests. Hashing normalizes
/// lengths so `ct_eq` always compares 32 bytes.
fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A user profile with the hash stripped — the only user shape that leaves
/// the service.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_verified: bool,
    pub quota_limit: Option<u64>,
}

impl From<&UserRecord> for PublicProfile {
    fn from(user: &UserRecord) -> Self {
        Self {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            created_at: user.created_at,
            last_login: user.last_login,
            is_active: user.is_active,
            is_verified: user.is_verified,
            quota_limit: user.quota_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user_profile: PublicProfile,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AuthService {
    store: UserStore,
    hasher: PasswordHasher,
    tokens: TokenManager,
    refresh_cache: Mutex<HashMap<String, String>>,
    hot_cache: Option<Arc<dyn HotCache>>,
    refresh_ttl: Duration,
    /// Emails granted the admin role at registration.
    admin_emails: Vec<String>,
}

impl AuthService {
    pub fn new(
        store: UserStore,
        hasher: PasswordHasher,
        tokens: TokenManager,
        hot_cache: Option<Arc<dyn HotCache>>,
        refresh_ttl_secs: u64,
        admin_emails: Vec<String>,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            refresh_cache: Mutex::new(HashMap::new()),
            hot_cache,
            refresh_ttl: Duration::from_secs(refresh_ttl_secs),
            admin_emails,
        }
    }

    pub fn store(&self) -> &UserStore {
        &self.store
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register a new user. Rejects duplicate email/username and weak
    /// passwords; returns the profile without the hash.
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<PublicProfile> {
        validate::validate_username(username)?;
        validate::validate_email(email)?;
        validate::validate_password_strength(password)?;

        let roles = if self
            .admin_emails
            .iter()
            .any(|a| a.eq_ignore_ascii_case(email))
        {
            vec![Role::Admin]
        } else {
            vec![Role::User]
        };

        let record = UserRecord {
            user_id: Uuid::new_v4().to_string(),
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash: self.hasher.hash(password)?,
            roles,
            created_at: Utc::now(),
            last_login: None,
            is_active: true,
            is_verified: false,
            quota_limit: None,
            quota_used: 0,
        };
        self.store.insert(record.clone())?;
        tracing::info!(user_id = %record.user_id, username = %record.username, "user registered");
        Ok(PublicProfile::from(&record))
    }

    // ── Login / refresh / logout ─────────────────────────────────────

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let user = self.store.find_by_email(email).ok_or_else(|| {
            Error::auth(AuthErrorKind::InvalidCredentials, "email or password mismatch")
        })?;
        if !self.hasher.verify(password, &user.password_hash) {
            return Err(Error::auth(
                AuthErrorKind::InvalidCredentials,
                "email or password mismatch",
            ));
        }
        if !user.is_active {
            return Err(Error::auth(
                AuthErrorKind::InvalidCredentials,
                "account is disabled",
            ));
        }

        let access_token = self.tokens.issue_access(&user.user_id, &user.roles)?;
        let refresh_token = self.tokens.issue_refresh(&user.user_id)?;
        self.cache_refresh_token(&user.user_id, &refresh_token).await;

        let user = self.store.update(&user.user_id, |u| {
            u.last_login = Some(Utc::now());
        })?;

        Ok(LoginOutcome {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.tokens.access_ttl_secs(),
            user_profile: PublicProfile::from(&user),
        })
    }

    /// Verify a refresh token, cross-check the cached copy when present,
    /// and mint a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(String, u64)> {
        let claims = self.tokens.verify(refresh_token, TokenType::Refresh)?;

        if let Some(cached) = self.cached_refresh_token(&claims.sub).await {
            if !token_eq(&cached, refresh_token) {
                return Err(Error::auth(
                    AuthErrorKind::InvalidToken,
                    "refresh token has been superseded",
                ));
            }
        }

        let user = self.store.get(&claims.sub).ok_or_else(|| {
            Error::auth(AuthErrorKind::UserNotFound, "token subject no longer exists")
        })?;
        if !user.is_active {
            return Err(Error::auth(
                AuthErrorKind::InvalidCredentials,
                "account is disabled",
            ));
        }

        let access = self.tokens.issue_access(&user.user_id, &user.roles)?;
        Ok((access, self.tokens.access_ttl_secs()))
    }

    /// Invalidate the cached refresh token.
    pub async fn logout(&self, user_id: &str) {
        self.refresh_cache.lock().remove(user_id);
        if let Some(cache) = &self.hot_cache {
            if let Err(e) = cache.delete(&refresh_cache_key(user_id)).await {
                TraceEvent::HotCacheDegraded {
                    operation: "auth_logout".into(),
                    error: e.to_string(),
                }
                .emit();
            }
        }
    }

    // ── Access-token verification ────────────────────────────────────

    /// Verify an access token and load its (active) user.
    pub fn verify_access(&self, token: &str) -> Result<UserRecord> {
        let claims = self.tokens.verify(token, TokenType::Access)?;
        let user = self.store.get(&claims.sub).ok_or_else(|| {
            Error::auth(AuthErrorKind::UserNotFound, "token subject no longer exists")
        })?;
        if !user.is_active {
            return Err(Error::auth(
                AuthErrorKind::InvalidCredentials,
                "account is disabled",
            ));
        }
        Ok(user)
    }

    // ── Account management ───────────────────────────────────────────

    pub fn change_password(&self, user_id: &str, current: &str, new: &str) -> Result<()> {
        let user = self.store.get(user_id).ok_or_else(|| {
            Error::auth(AuthErrorKind::UserNotFound, format!("no user {user_id}"))
        })?;
        if !self.hasher.verify(current, &user.password_hash) {
            return Err(Error::auth(
                AuthErrorKind::InvalidCredentials,
                "current password mismatch",
            ));
        }
        validate::validate_password_strength(new)?;
        let hash = self.hasher.hash(new)?;
        self.store.update(user_id, |u| {
            u.password_hash = hash;
        })?;
        Ok(())
    }

    /// Remove a user and invalidate their tokens. The caller is
    /// responsible for purging owned sessions and memory records.
    pub async fn delete_user(&self, user_id: &str) -> Result<bool> {
        self.logout(user_id).await;
        self.store.delete(user_id)
    }

    // ── Private: refresh-token cache ─────────────────────────────────

    async fn cache_refresh_token(&self, user_id: &str, token: &str) {
        self.refresh_cache
            .lock()
            .insert(user_id.to_owned(), token.to_owned());
        if let Some(cache) = &self.hot_cache {
            let value = Value::String(token.to_owned());
            if let Err(e) = cache
                .set(&refresh_cache_key(user_id), &value, self.refresh_ttl)
                .await
            {
                TraceEvent::HotCacheDegraded {
                    operation: "auth_cache_refresh".into(),
                    error: e.to_string(),
                }
                .emit();
            }
        }
    }

    async fn cached_refresh_token(&self, user_id: &str) -> Option<String> {
        if let Some(token) = self.refresh_cache.lock().get(user_id).cloned() {
            return Some(token);
        }
        let cache = self.hot_cache.as_ref()?;
        match cache.get(&refresh_cache_key(user_id)).await {
            Ok(Some(Value::String(token))) => Some(token),
            Ok(_) => None,
            Err(e) => {
                TraceEvent::HotCacheDegraded {
                    operation: "auth_read_refresh".into(),
                    error: e.to_string(),
                }
                .emit();
                None
            }
        }
    }
}
