use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authentication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the token-signing secret. The secret
    /// itself never appears in config files; it must be at least 32 bytes.
    #[serde(default = "d_secret_env")]
    pub secret_env: String,

    /// bcrypt cost factor. Clamped to [10, 16] at hasher construction.
    #[serde(default = "d_bcrypt_cost")]
    pub bcrypt_cost: u32,

    /// Access-token lifetime in seconds (~1 hour).
    #[serde(default = "d_access_ttl")]
    pub access_token_ttl_secs: u64,

    /// Refresh-token lifetime in seconds (~30 days).
    #[serde(default = "d_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// Path of the user store file.
    #[serde(default = "d_users_path")]
    pub users_path: std::path::PathBuf,

    /// Emails granted the admin role at registration.
    #[serde(default)]
    pub admin_emails: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_env: d_secret_env(),
            bcrypt_cost: d_bcrypt_cost(),
            access_token_ttl_secs: d_access_ttl(),
            refresh_token_ttl_secs: d_refresh_ttl(),
            users_path: d_users_path(),
            admin_emails: Vec::new(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_secret_env() -> String {
    "CHOIR_TOKEN_SECRET".into()
}
fn d_bcrypt_cost() -> u32 {
    12
}
fn d_access_ttl() -> u64 {
    3600
}
fn d_refresh_ttl() -> u64 {
    2_592_000
}
fn d_users_path() -> std::path::PathBuf {
    "data/users.json".into()
}
