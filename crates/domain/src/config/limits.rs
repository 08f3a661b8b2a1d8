use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Route rate limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-route arrival-rate caps, expressed as requests per window. Keys are
/// the authenticated user id when available, else the remote address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    /// Window length in seconds.
    #[serde(default = "d_window")]
    pub window_secs: u64,

    #[serde(default = "d_register")]
    pub register: u32,
    #[serde(default = "d_login")]
    pub login: u32,
    #[serde(default = "d_refresh")]
    pub refresh: u32,
    #[serde(default = "d_change_password")]
    pub change_password: u32,
    #[serde(default = "d_chat")]
    pub chat: u32,
    #[serde(default = "d_chat_stream")]
    pub chat_stream: u32,
    #[serde(default = "d_memory_search")]
    pub memory_search: u32,
    #[serde(default = "d_memory_store")]
    pub memory_store: u32,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            window_secs: d_window(),
            register: d_register(),
            login: d_login(),
            refresh: d_refresh(),
            change_password: d_change_password(),
            chat: d_chat(),
            chat_stream: d_chat_stream(),
            memory_search: d_memory_search(),
            memory_store: d_memory_store(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_window() -> u64 {
    60
}
fn d_register() -> u32 {
    5
}
fn d_login() -> u32 {
    10
}
fn d_refresh() -> u32 {
    20
}
fn d_change_password() -> u32 {
    5
}
fn d_chat() -> u32 {
    30
}
fn d_chat_stream() -> u32 {
    20
}
fn d_memory_search() -> u32 {
    60
}
fn d_memory_store() -> u32 {
    30
}
