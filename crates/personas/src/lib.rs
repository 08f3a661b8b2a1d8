//! Persona layer: the deterministic router, the handler contract, prompt
//! assembly, the provider trait with its OpenAI-compatible adapter, and
//! fallback utterances.

pub mod fallback;
pub mod handler;
pub mod prompt;
pub mod provider;
pub mod router;

pub use fallback::fallback_reply;
pub use handler::{HandlerSet, LlmPersonaHandler, PersonaHandler};
pub use provider::{
    ChatMessage, ChatReply, ChatRole, LlmProvider, OpenAiCompatProvider, ProviderRegistry,
    ProviderRequest,
};
pub use router::PersonaRouter;
