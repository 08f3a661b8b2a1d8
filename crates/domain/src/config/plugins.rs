use serde::{Deserialize, Serialize};

/// Plugin host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "d_enabled")]
    pub enabled: bool,
    /// Execution history entries retained per host.
    #[serde(default = "d_max_history")]
    pub max_history: usize,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: d_enabled(),
            max_history: d_max_history(),
        }
    }
}

fn d_enabled() -> bool {
    true
}
fn d_max_history() -> usize {
    100
}
