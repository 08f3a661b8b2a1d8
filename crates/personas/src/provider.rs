//! Language-model provider contract and the OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, and any other endpoint that
//! follows the OpenAI chat completions wire format. Providers are external
//! collaborators: only this narrow contract is depended on, and the
//! dispatch core wraps every call in its retry envelope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use choir_domain::config::{LlmConfig, ProviderConfig};
use choir_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / reply types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub messages: Vec<ChatMessage>,
    /// Model override. `None` = the provider's configured default.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A provider-agnostic chat completion reply.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    /// The model that actually produced the reply.
    pub model: String,
    pub total_tokens: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every language-model adapter implements.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full reply.
    async fn chat(&self, req: ProviderRequest) -> Result<ChatReply>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI-compatible adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from its config. The API key is read once from
    /// the named environment variable.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = cfg
            .api_key_env
            .as_ref()
            .and_then(|env| std::env::var(env).ok())
            .filter(|key| !key.is_empty());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Provider {
                provider: cfg.id.clone(),
                message: format!("building HTTP client: {e}"),
            })?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
            default_model: cfg.default_model.clone().unwrap_or_else(|| "gpt-4o".into()),
            timeout_secs: cfg.timeout_secs,
            client,
        })
    }

    fn build_body(&self, req: &ProviderRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "messages": messages,
            "stream": false,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = Value::from(t);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = Value::from(max);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ProviderRequest) -> Result<ChatReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);
        tracing::debug!(
            provider = %self.id,
            messages = req.messages.len(),
            "chat completion request"
        );

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::ProviderTimeout {
                    provider: self.id.clone(),
                    seconds: self.timeout_secs,
                }
            } else {
                Error::Provider {
                    provider: self.id.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("{status}: {body}"),
            });
        }

        let payload: Value = response.json().await.map_err(|e| Error::Provider {
            provider: self.id.clone(),
            message: format!("decoding response: {e}"),
        })?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_owned();
        if content.is_empty() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: "empty completion".into(),
            });
        }

        Ok(ChatReply {
            content,
            model: payload["model"]
                .as_str()
                .unwrap_or(&self.default_model)
                .to_owned(),
            total_tokens: payload["usage"]["total_tokens"]
                .as_u64()
                .map(|t| t as u32),
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All configured providers keyed by id. The first configured provider is
/// the default.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_id: Option<String>,
}

impl ProviderRegistry {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut default_id = None;
        for provider_cfg in &cfg.providers {
            let provider = OpenAiCompatProvider::from_config(provider_cfg)?;
            if default_id.is_none() {
                default_id = Some(provider_cfg.id.clone());
            }
            providers.insert(provider_cfg.id.clone(), Arc::new(provider));
        }
        Ok(Self {
            providers,
            default_id,
        })
    }

    /// Build a registry from pre-constructed providers (tests, stubs).
    pub fn from_providers(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        let default_id = providers.first().map(|p| p.provider_id().to_owned());
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.provider_id().to_owned(), p))
                .collect(),
            default_id,
        }
    }

    /// Look up a provider, falling back to the default when `id` is `None`.
    pub fn get(&self, id: Option<&str>) -> Option<Arc<dyn LlmProvider>> {
        let id = id.or(self.default_id.as_deref())?;
        self.providers.get(id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_cfg(id: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.into(),
            base_url: "http://localhost:11434/v1".into(),
            api_key_env: None,
            default_model: Some("llama3".into()),
            timeout_secs: 5,
        }
    }

    #[test]
    fn registry_default_is_first_configured() {
        let cfg = LlmConfig {
            providers: vec![provider_cfg("first"), provider_cfg("second")],
            ..LlmConfig::default()
        };
        let registry = ProviderRegistry::from_config(&cfg).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(None).unwrap().provider_id(), "first");
        assert_eq!(registry.get(Some("second")).unwrap().provider_id(), "second");
        assert!(registry.get(Some("ghost")).is_none());
    }

    #[test]
    fn empty_registry() {
        let registry = ProviderRegistry::from_config(&LlmConfig::default()).unwrap();
        assert!(registry.is_empty());
        assert!(registry.get(None).is_none());
    }

    #[test]
    fn body_includes_messages_and_model() {
        let provider = OpenAiCompatProvider::from_config(&provider_cfg("p")).unwrap();
        let req = ProviderRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            model: None,
            temperature: Some(0.7),
            max_tokens: Some(256),
        };
        let body = provider.build_body(&req);
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn model_override_wins() {
        let provider = OpenAiCompatProvider::from_config(&provider_cfg("p")).unwrap();
        let req = ProviderRequest {
            messages: vec![ChatMessage::user("hi")],
            model: Some("mistral".into()),
            ..ProviderRequest::default()
        };
        assert_eq!(provider.build_body(&req)["model"], "mistral");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_provider_error() {
        let cfg = ProviderConfig {
            id: "dead".into(),
            base_url: "http://127.0.0.1:1/v1".into(),
            api_key_env: None,
            default_model: None,
            timeout_secs: 1,
        };
        let provider = OpenAiCompatProvider::from_config(&cfg).unwrap();
        let err = provider
            .chat(ProviderRequest {
                messages: vec![ChatMessage::user("hi")],
                ..ProviderRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            "provider_error" | "provider_timeout"
        ));
    }
}
