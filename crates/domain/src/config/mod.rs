mod auth;
mod limits;
mod llm;
mod memory;
mod personas;
mod plugins;
mod quota;
mod server;

pub use auth::*;
pub use limits::*;
pub use llm::*;
pub use memory::*;
pub use personas::*;
pub use plugins::*;
pub use quota::*;
pub use server::*;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub personas: PersonasConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Server port must be non-zero.
        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        // Server host must not be empty.
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        // At least one persona, and the default must exist.
        if self.personas.personas.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "personas.personas".into(),
                message: "at least one persona must be configured".into(),
            });
        } else if self.personas.get(&self.personas.default_persona).is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "personas.default_persona".into(),
                message: format!(
                    "default persona \"{}\" is not in the configured set",
                    self.personas.default_persona
                ),
            });
        }

        // Duplicate persona names and reserved speaker names.
        let mut seen: HashSet<&str> = HashSet::new();
        for (i, persona) in self.personas.personas.iter().enumerate() {
            if persona.name.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("personas.personas[{i}].name"),
                    message: "persona name must not be empty".into(),
                });
                continue;
            }
            if matches!(persona.name.as_str(), "user" | "system") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("personas.personas[{i}].name"),
                    message: format!("\"{}\" is a reserved speaker name", persona.name),
                });
            }
            if !seen.insert(&persona.name) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("personas.personas[{i}].name"),
                    message: format!("duplicate persona name \"{}\"", persona.name),
                });
            }
            if persona.fallback.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("personas.personas[{i}].fallback"),
                    message: "fallback utterance must not be empty".into(),
                });
            }
        }

        // Warn when no LLM providers are configured (fallback-only replies).
        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured — all replies will be fallbacks".into(),
            });
        }

        // Validate each provider.
        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }
            if !provider.id.is_empty() && !seen_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later provider will shadow earlier one",
                        provider.id
                    ),
                });
            }
        }

        // Personas must reference configured providers.
        for (i, persona) in self.personas.personas.iter().enumerate() {
            if let Some(ref provider_id) = persona.provider {
                if !self.llm.providers.iter().any(|p| &p.id == provider_id) {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("personas.personas[{i}].provider"),
                        message: format!("unknown provider id \"{provider_id}\""),
                    });
                }
            }
        }

        // Retry envelope sanity.
        if self.llm.retry.max_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.retry.max_attempts".into(),
                message: "max_attempts must be at least 1".into(),
            });
        }

        // Memory tier bounds.
        if self.memory.short_term.max_items == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.short_term.max_items".into(),
                message: "max_items must be greater than 0".into(),
            });
        }
        if self.memory.mid_term.max_working_set == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.mid_term.max_working_set".into(),
                message: "max_working_set must be greater than 0".into(),
            });
        }
        if self.memory.buffer_turns == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.buffer_turns".into(),
                message: "buffer_turns must be greater than 0".into(),
            });
        }

        // Hot cache URL only matters when enabled.
        if self.memory.hot_cache.enabled
            && !self.memory.hot_cache.base_url.starts_with("http://")
            && !self.memory.hot_cache.base_url.starts_with("https://")
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.hot_cache.base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.memory.hot_cache.base_url
                ),
            });
        }

        // Quota and rate limits must be positive.
        if self.quota.default_daily_limit == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "quota.default_daily_limit".into(),
                message: "default_daily_limit must be greater than 0".into(),
            });
        }
        if self.rate_limits.window_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "rate_limits.window_secs".into(),
                message: "window_secs must be greater than 0".into(),
            });
        }
        for (field, value) in [
            ("rate_limits.register", self.rate_limits.register),
            ("rate_limits.login", self.rate_limits.login),
            ("rate_limits.refresh", self.rate_limits.refresh),
            ("rate_limits.change_password", self.rate_limits.change_password),
            ("rate_limits.chat", self.rate_limits.chat),
            ("rate_limits.chat_stream", self.rate_limits.chat_stream),
            ("rate_limits.memory_search", self.rate_limits.memory_search),
            ("rate_limits.memory_store", self.rate_limits.memory_store),
        ] {
            if value == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: "rate limit must be greater than 0".into(),
                });
            }
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build a minimal valid Config.
    fn valid_config() -> Config {
        Config {
            llm: LlmConfig {
                providers: vec![ProviderConfig {
                    id: "ollama".into(),
                    base_url: "http://localhost:11434/v1".into(),
                    api_key_env: None,
                    default_model: Some("llama3".into()),
                    timeout_secs: 30,
                }],
                ..LlmConfig::default()
            },
            ..Config::default()
        }
    }

    /// Helper: find the first issue matching a field prefix.
    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.port").expect("expected server.port error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn default_persona_must_exist() {
        let mut cfg = valid_config();
        cfg.personas.default_persona = "ghost".into();
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "personas.default_persona").expect("expected default error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn reserved_speaker_names_rejected() {
        let mut cfg = valid_config();
        cfg.personas.personas[0].name = "system".into();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.message.contains("reserved speaker name")));
    }

    #[test]
    fn duplicate_persona_names_rejected() {
        let mut cfg = valid_config();
        let dup = cfg.personas.personas[0].clone();
        cfg.personas.personas.push(dup);
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.message.contains("duplicate persona name")));
    }

    #[test]
    fn empty_fallback_is_error() {
        let mut cfg = valid_config();
        cfg.personas.personas[0].fallback = "  ".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "personas.personas[0].fallback")
            .expect("expected fallback error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn no_providers_is_warning_only() {
        let mut cfg = valid_config();
        cfg.llm.providers.clear();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers").expect("expected no-providers warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn provider_bad_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].base_url = "ftp://nope".into();
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "llm.providers[0].base_url").expect("expected base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn persona_unknown_provider_is_error() {
        let mut cfg = valid_config();
        cfg.personas.personas[0].provider = Some("missing".into());
        let issues = cfg.validate();
        let issue = find_issue(&issues, "personas.personas[0].provider")
            .expect("expected provider reference error");
        assert!(issue.message.contains("missing"));
    }

    #[test]
    fn zero_retry_attempts_is_error() {
        let mut cfg = valid_config();
        cfg.llm.retry.max_attempts = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "llm.retry.max_attempts").is_some());
    }

    #[test]
    fn zero_rate_limit_is_error() {
        let mut cfg = valid_config();
        cfg.rate_limits.chat = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "rate_limits.chat").expect("expected rate limit error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn hot_cache_url_checked_only_when_enabled() {
        let mut cfg = valid_config();
        cfg.memory.hot_cache.base_url = "not-a-url".into();
        assert!(find_issue(&cfg.validate(), "memory.hot_cache").is_none());

        cfg.memory.hot_cache.enabled = true;
        assert!(find_issue(&cfg.validate(), "memory.hot_cache").is_some());
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(
            format!("{err}"),
            "[ERROR] server.port: port must be greater than 0"
        );
    }
}
