use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-user daily quota of chargeable operations. Resets at UTC midnight.
///
/// `default_daily_limit` applies to any user without a per-user entry; a
/// user profile's own `quota_limit` (when set at registration time) takes
/// precedence over both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Daily chargeable-operation limit applied by default.
    #[serde(default = "d_daily_limit")]
    pub default_daily_limit: u64,
    /// Per-user overrides keyed by user id.
    #[serde(default)]
    pub per_user: HashMap<String, u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_daily_limit: d_daily_limit(),
            per_user: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    /// Resolve the effective limit for a user, preferring the profile's
    /// limit, then the per-user override, then the default.
    pub fn limit_for(&self, user_id: &str, profile_limit: Option<u64>) -> u64 {
        profile_limit
            .or_else(|| self.per_user.get(user_id).copied())
            .unwrap_or(self.default_daily_limit)
    }
}

fn d_daily_limit() -> u64 {
    100
}
