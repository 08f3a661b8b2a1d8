use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    /// Configured provider endpoints. The first entry is the registry
    /// default unless a persona names another id.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Retry envelope applied around provider-backed handler calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// One OpenAI-compatible chat endpoint (OpenAI, Ollama, vLLM, LM Studio…).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique id referenced by persona configs.
    pub id: String,
    /// e.g. `http://localhost:11434/v1` for Ollama.
    pub base_url: String,
    /// Environment variable holding the API key. `None` = unauthenticated
    /// endpoint (local runtimes).
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model sent when neither the persona nor the request names one.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Per-call timeout in seconds.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
}

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "d_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_attempts(),
            initial_delay_ms: d_initial_delay(),
            max_delay_ms: d_max_delay(),
            backoff_factor: d_factor(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_timeout() -> u64 {
    30
}
fn d_attempts() -> u32 {
    3
}
fn d_initial_delay() -> u64 {
    200
}
fn d_max_delay() -> u64 {
    5000
}
fn d_factor() -> f64 {
    2.0
}
