//! The persona handler contract.
//!
//! Every handler turns `(history, utterance, supplementary context)` into
//! `(reply_text, metadata)`. Handlers are polymorphic over the capability
//! set {build-prompt, invoke-backend, post-process}; the dispatch core only
//! sees the trait, so implementations can be swapped freely.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use choir_domain::config::PersonaConfig;
use choir_domain::error::Result;
use choir_domain::types::TurnRecord;

use crate::prompt;
use crate::provider::{ChatMessage, ChatReply, LlmProvider, ProviderRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait PersonaHandler: Send + Sync {
    /// The persona this handler speaks as.
    fn persona(&self) -> &PersonaConfig;

    /// Assemble the provider messages for one turn.
    fn build_prompt(
        &self,
        history: &[TurnRecord],
        utterance: &str,
        supplementary: Option<&str>,
    ) -> Vec<ChatMessage>;

    /// Call the backing language model.
    async fn invoke_backend(&self, messages: Vec<ChatMessage>) -> Result<ChatReply>;

    /// Shape the raw reply into `(reply_text, metadata)`.
    fn post_process(&self, reply: ChatReply) -> (String, Value);

    /// The full pipeline. Handlers rarely override this.
    async fn generate(
        &self,
        history: &[TurnRecord],
        utterance: &str,
        supplementary: Option<&str>,
    ) -> Result<(String, Value)> {
        let messages = self.build_prompt(history, utterance, supplementary);
        let reply = self.invoke_backend(messages).await?;
        Ok(self.post_process(reply))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM-backed handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlmPersonaHandler {
    persona: PersonaConfig,
    provider: Arc<dyn LlmProvider>,
}

impl LlmPersonaHandler {
    pub fn new(persona: PersonaConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self { persona, provider }
    }
}

#[async_trait]
impl PersonaHandler for LlmPersonaHandler {
    fn persona(&self) -> &PersonaConfig {
        &self.persona
    }

    fn build_prompt(
        &self,
        history: &[TurnRecord],
        utterance: &str,
        supplementary: Option<&str>,
    ) -> Vec<ChatMessage> {
        prompt::build_messages(&self.persona, history, utterance, supplementary)
    }

    async fn invoke_backend(&self, messages: Vec<ChatMessage>) -> Result<ChatReply> {
        self.provider
            .chat(ProviderRequest {
                messages,
                model: self.persona.model.clone(),
                ..ProviderRequest::default()
            })
            .await
    }

    fn post_process(&self, reply: ChatReply) -> (String, Value) {
        let metadata = serde_json::json!({
            "model": reply.model,
            "tokens": reply.total_tokens,
            "provider": self.provider.provider_id(),
        });
        (reply.content.trim().to_owned(), metadata)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The configured handlers keyed by persona name.
pub struct HandlerSet {
    handlers: HashMap<String, Arc<dyn PersonaHandler>>,
}

impl HandlerSet {
    pub fn new(handlers: Vec<Arc<dyn PersonaHandler>>) -> Self {
        Self {
            handlers: handlers
                .into_iter()
                .map(|h| (h.persona().name.clone(), h))
                .collect(),
        }
    }

    pub fn get(&self, persona: &str) -> Option<Arc<dyn PersonaHandler>> {
        self.handlers.get(persona).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
