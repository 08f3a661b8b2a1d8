//! The user store: a JSON-file-backed table keyed by user id, with unique
//! constraints on `username` and `email`. Users are root records — nothing
//! deletes them implicitly.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use choir_domain::error::{AuthErrorKind, Error, Result};

use crate::roles::Role;

/// One stored user. The password hash never leaves this crate except
/// through [`crate::service::PublicProfile`], which omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default = "d_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_verified: bool,
    /// Per-user daily quota override. `None` = configured default.
    #[serde(default)]
    pub quota_limit: Option<u64>,
    /// Lifetime chargeable operations, updated at session boundaries.
    #[serde(default)]
    pub quota_used: u64,
}

fn d_true() -> bool {
    true
}

pub struct UserStore {
    path: PathBuf,
    users: RwLock<HashMap<String, UserRecord>>,
}

impl UserStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let users: HashMap<String, UserRecord> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        tracing::info!(users = users.len(), path = %path.display(), "user store loaded");
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    fn persist(&self, users: &HashMap<String, UserRecord>) -> Result<()> {
        let json = serde_json::to_string_pretty(users)?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::Database(format!("persisting users: {e}")))
    }

    /// Insert a new user, enforcing the unique constraints.
    pub fn insert(&self, record: UserRecord) -> Result<()> {
        let mut users = self.users.write();
        let duplicate = users.values().any(|u| {
            u.username.eq_ignore_ascii_case(&record.username)
                || u.email.eq_ignore_ascii_case(&record.email)
        });
        if duplicate {
            return Err(Error::auth(
                AuthErrorKind::UserAlreadyExists,
                "username or email already registered",
            ));
        }
        users.insert(record.user_id.clone(), record);
        self.persist(&users)
    }

    pub fn get(&self, user_id: &str) -> Option<UserRecord> {
        self.users.read().get(user_id).cloned()
    }

    pub fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        self.users
            .read()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    pub fn find_by_username(&self, username: &str) -> Option<UserRecord> {
        self.users
            .read()
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned()
    }

    /// Mutate one user under the write lock. Errors with `user-not-found`
    /// when absent.
    pub fn update<F>(&self, user_id: &str, mutate: F) -> Result<UserRecord>
    where
        F: FnOnce(&mut UserRecord),
    {
        let mut users = self.users.write();
        let record = users.get_mut(user_id).ok_or_else(|| {
            Error::auth(AuthErrorKind::UserNotFound, format!("no user {user_id}"))
        })?;
        mutate(record);
        let updated = record.clone();
        self.persist(&users)?;
        Ok(updated)
    }

    pub fn delete(&self, user_id: &str) -> Result<bool> {
        let mut users = self.users.write();
        let removed = users.remove(user_id).is_some();
        if removed {
            self.persist(&users)?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}
