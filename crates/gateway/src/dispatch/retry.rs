//! The provider retry envelope.
//!
//! Persona handler invocations are wrapped in bounded retries with
//! exponential backoff and deterministic jitter. After the final failure
//! the dispatch returns a persona-flavored fallback utterance instead of
//! propagating the provider error, so end-to-end conversation continues;
//! the fallback is recorded in metrics. Cancellation skips any remaining
//! retries once the in-flight attempt returns.

use std::time::{Duration, Instant};

use serde_json::Value;

use choir_domain::config::{PersonaConfig, RetryConfig};
use choir_domain::metrics::MetricsCollector;
use choir_domain::trace::TraceEvent;
use choir_domain::types::TurnRecord;
use choir_personas::{fallback_reply, PersonaHandler};

use super::cancel::CancelToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_factor: cfg.backoff_factor,
        }
    }

    /// Backoff before retry number `attempt` (1-indexed), capped at
    /// `max_delay` plus up to 25% jitter to spread synchronized retries.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }
}

/// Cheap deterministic "random" fraction [0, 1) based on the attempt
/// number. Not cryptographically secure — just enough to spread retry
/// storms.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the envelope produced: either a provider reply or the persona's
/// fallback utterance.
pub struct InvocationOutcome {
    pub reply: String,
    pub metadata: Value,
    pub fell_back: bool,
    pub attempts: u32,
}

/// Run one handler invocation under the retry envelope. Never errors: the
/// worst case is the persona's fallback utterance.
pub async fn invoke_with_retry(
    policy: &RetryPolicy,
    persona: &PersonaConfig,
    handler: &dyn PersonaHandler,
    history: &[TurnRecord],
    utterance: &str,
    supplementary: Option<&str>,
    cancel: &CancelToken,
    metrics: &MetricsCollector,
) -> InvocationOutcome {
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        attempts += 1;

        let start = Instant::now();
        let result = handler.generate(history, utterance, supplementary).await;
        let elapsed_ms = start.elapsed().as_millis() as f64;
        metrics.record_provider_call(elapsed_ms, result.is_ok());

        match result {
            Ok((reply, metadata)) if !reply.trim().is_empty() => {
                return InvocationOutcome {
                    reply,
                    metadata,
                    fell_back: false,
                    attempts,
                };
            }
            Ok(_) => {
                tracing::warn!(persona = %persona.name, "provider returned empty reply");
            }
            Err(e) => {
                TraceEvent::ProviderRetry {
                    provider: persona.provider.clone().unwrap_or_else(|| "default".into()),
                    attempt: attempts,
                    error: e.to_string(),
                }
                .emit();
                metrics.record_error(e.kind());
            }
        }

        if cancel.is_cancelled() {
            // The current attempt has returned; skip the remaining ones.
            break;
        }
        if attempts < policy.max_attempts {
            metrics.record_provider_retry();
            tokio::time::sleep(policy.delay_for_attempt(attempts)).await;
        }
    }

    metrics.record_provider_fallback();
    TraceEvent::ProviderFallback {
        persona: persona.name.clone(),
    }
    .emit();

    InvocationOutcome {
        reply: fallback_reply(persona),
        metadata: serde_json::json!({ "fallback": true }),
        fell_back: true,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use choir_domain::config::PersonasConfig;
    use choir_domain::error::{Error, Result};
    use choir_personas::{ChatMessage, ChatReply};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyHandler {
        persona: PersonaConfig,
        calls: Arc<AtomicU32>,
        succeed_on: Option<u32>,
    }

    #[async_trait]
    impl PersonaHandler for FlakyHandler {
        fn persona(&self) -> &PersonaConfig {
            &self.persona
        }

        fn build_prompt(
            &self,
            _history: &[TurnRecord],
            utterance: &str,
            _supplementary: Option<&str>,
        ) -> Vec<ChatMessage> {
            vec![ChatMessage::user(utterance)]
        }

        async fn invoke_backend(&self, _messages: Vec<ChatMessage>) -> Result<ChatReply> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.succeed_on {
                Some(n) if call >= n => Ok(ChatReply {
                    content: format!("reply on attempt {call}"),
                    model: "stub".into(),
                    total_tokens: None,
                }),
                _ => Err(Error::Provider {
                    provider: "stub".into(),
                    message: "boom".into(),
                }),
            }
        }

        fn post_process(&self, reply: ChatReply) -> (String, Value) {
            (reply.content, Value::Null)
        }
    }

    fn persona() -> PersonaConfig {
        PersonasConfig::default().get("lumina").unwrap().clone()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
        }
    }

    fn handler(succeed_on: Option<u32>) -> (FlakyHandler, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            FlakyHandler {
                persona: persona(),
                calls: calls.clone(),
                succeed_on,
            },
            calls,
        )
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let (handler, calls) = handler(Some(1));
        let metrics = MetricsCollector::new();
        let outcome = invoke_with_retry(
            &policy(),
            &persona(),
            &handler,
            &[],
            "hi",
            None,
            &CancelToken::new(),
            &metrics,
        )
        .await;
        assert!(!outcome.fell_back);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.summary().provider.total_retries, 0);
    }

    #[tokio::test]
    async fn recovers_on_retry() {
        let (handler, _) = handler(Some(3));
        let metrics = MetricsCollector::new();
        let outcome = invoke_with_retry(
            &policy(),
            &persona(),
            &handler,
            &[],
            "hi",
            None,
            &CancelToken::new(),
            &metrics,
        )
        .await;
        assert!(!outcome.fell_back);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.reply, "reply on attempt 3");
        assert_eq!(metrics.summary().provider.total_retries, 2);
        assert_eq!(metrics.summary().provider.total_fallbacks, 0);
    }

    #[tokio::test]
    async fn exhaustion_yields_persona_fallback() {
        let (handler, calls) = handler(None);
        let metrics = MetricsCollector::new();
        let outcome = invoke_with_retry(
            &policy(),
            &persona(),
            &handler,
            &[],
            "hi",
            None,
            &CancelToken::new(),
            &metrics,
        )
        .await;
        assert!(outcome.fell_back);
        assert!(!outcome.reply.is_empty());
        assert_eq!(outcome.reply, persona().fallback);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.summary().provider.total_fallbacks, 1);
        assert_eq!(outcome.metadata["fallback"], true);
    }

    #[tokio::test]
    async fn cancellation_skips_remaining_retries() {
        let (handler, calls) = handler(None);
        let metrics = MetricsCollector::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = invoke_with_retry(
            &policy(),
            &persona(),
            &handler,
            &[],
            "hi",
            None,
            &cancel,
            &metrics,
        )
        .await;
        // One attempt was already in flight; no more after the signal.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.fell_back);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            backoff_factor: 2.0,
        };
        let d1 = policy.delay_for_attempt(1);
        let d2 = policy.delay_for_attempt(2);
        assert!(d2 >= d1);
        // Cap plus 25% jitter.
        assert!(policy.delay_for_attempt(10) <= Duration::from_millis(500));
    }

    #[test]
    fn jitter_is_deterministic() {
        let policy = policy();
        assert_eq!(policy.delay_for_attempt(2), policy.delay_for_attempt(2));
    }
}
