//! Turn dispatch — the orchestrator behind `/chat` and `/chat/stream`.
//!
//! One dispatch: validate, translate the session id, check quota, take the
//! session lock, build context from the memory facade, invoke the routed
//! persona handler under the retry envelope, commit the turn pair and KPI
//! update, then release. The commit happens under the lock; streaming
//! emission happens after release so the lock is never held across client
//! I/O.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use choir_domain::config::PersonaRole;
use choir_domain::error::{Error, Result};
use choir_domain::types::{KpiKind, Speaker};
use choir_domain::validate;

use crate::state::AppState;

use super::cancel::CancelToken;
use super::quota::QuotaInfo;
use super::retry::invoke_with_retry;

/// Characters per streamed fragment.
const STREAM_FRAGMENT_CHARS: usize = 48;

/// How many buffered turns feed the prompt.
const CONTEXT_TURNS: usize = 6;

/// How many knowledge hits supplement a searcher turn.
const SEARCH_CONTEXT_HITS: usize = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs / outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The authenticated originator of a dispatch.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    /// Per-profile daily quota override.
    pub quota_limit: Option<u64>,
}

/// A completed chat dispatch.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// The client-visible session id (never the internal one).
    pub session_id: String,
    pub persona: String,
    pub response: String,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
    pub quota: QuotaInfo,
}

/// One element of a streamed reply.
pub enum StreamFragment {
    Chunk(String),
    Done,
    Failed(Error),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Non-streaming dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn dispatch_chat(
    state: &AppState,
    caller: &Caller,
    external_session_id: &str,
    utterance: &str,
    persona_override: Option<&str>,
) -> Result<ChatOutcome> {
    // Received: validate before any chargeable work.
    let utterance = validate::validate_utterance(utterance)?;
    validate::validate_session_id(external_session_id)?;

    let persona_name = resolve_persona(state, &utterance, persona_override)?.to_owned();
    let internal_id = state
        .session_map
        .resolve(&caller.user_id, external_session_id);

    // Quota-checked.
    let limit = state
        .config
        .quota
        .limit_for(&caller.user_id, caller.quota_limit);
    state.quota.check(&caller.user_id, limit).await?;

    // Locked(session): one mutation per session at a time, FIFO.
    let _permit = state.session_locks.acquire(&internal_id).await?;
    let cancel = state.cancel_map.register(&internal_id);

    let result = run_locked_turn(state, caller, &internal_id, &persona_name, &utterance, &cancel)
        .await;

    state.cancel_map.remove(&internal_id);

    // Released (permit drops here).
    let (response, metadata) = result?;
    let quota = state.quota.info(&caller.user_id, limit).await;

    Ok(ChatOutcome {
        session_id: external_session_id.to_owned(),
        persona: persona_name,
        response,
        metadata,
        timestamp: Utc::now(),
        quota,
    })
}

/// Context-built → Invoked → Committed, under the session lock.
async fn run_locked_turn(
    state: &AppState,
    caller: &Caller,
    internal_id: &str,
    persona_name: &str,
    utterance: &str,
    cancel: &CancelToken,
) -> Result<(String, Value)> {
    // Context-built: read-only against the facade, so a failure here
    // leaves no observable side effect.
    let history = state.memory.recent_context(internal_id, CONTEXT_TURNS);
    let persona = state
        .router
        .config()
        .get(persona_name)
        .ok_or_else(|| Error::Internal(format!("persona \"{persona_name}\" vanished")))?
        .clone();

    let supplementary = if persona.role == PersonaRole::Searcher {
        let hits = state
            .memory
            .search_knowledge(utterance, None, SEARCH_CONTEXT_HITS);
        if hits.is_empty() {
            None
        } else {
            Some(
                hits.iter()
                    .map(|h| h.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n---\n"),
            )
        }
    } else {
        None
    };
    let searched = supplementary.is_some();

    // Invoked: the retry envelope never errors — worst case is the
    // persona's fallback utterance.
    let outcome = match state.handlers.get(persona_name) {
        Some(handler) => {
            invoke_with_retry(
                &state.retry_policy,
                &persona,
                handler.as_ref(),
                &history,
                utterance,
                supplementary.as_deref(),
                cancel,
                &state.metrics,
            )
            .await
        }
        // No provider configured for this persona: fall back immediately.
        None => {
            state.metrics.record_provider_fallback();
            super::retry::InvocationOutcome {
                reply: choir_personas::fallback_reply(&persona),
                metadata: serde_json::json!({ "fallback": true }),
                fell_back: true,
                attempts: 0,
            }
        }
    };

    // The charge decision is made at Invoked: fallback replies are still
    // chargeable, earlier failures charge nothing.
    state.quota.charge(&caller.user_id).await;

    // Committed: turn pair, KPIs, session summary — all under the lock so
    // a same-session reader after release observes the whole turn.
    state.memory.ingest_turn(
        internal_id,
        Speaker::User,
        utterance,
        Value::Null,
        None,
    )?;
    state.memory.ingest_turn(
        internal_id,
        Speaker::Persona(persona_name.to_owned()),
        &outcome.reply,
        outcome.metadata.clone(),
        None,
    )?;
    state
        .memory
        .update_persona_kpi(persona_name, KpiKind::TotalResponses, None)?;
    if searched && !outcome.fell_back {
        state
            .memory
            .update_persona_kpi(persona_name, KpiKind::SearchSuccess, None)?;
    }
    state
        .memory
        .save_session(internal_id, &caller.user_id, Value::Null)
        .await?;

    let mut metadata = outcome.metadata;
    if !metadata.is_object() {
        metadata = serde_json::json!({});
    }
    metadata["attempts"] = Value::from(outcome.attempts);
    Ok((outcome.reply, metadata))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a dispatch and emit the reply as a lazy fragment sequence
/// terminated by [`StreamFragment::Done`].
///
/// The session mutation commits before the first fragment; emission never
/// holds the session lock. Cancellation (token or a dropped receiver)
/// stops production within one fragment.
pub fn dispatch_chat_stream(
    state: AppState,
    caller: Caller,
    external_session_id: String,
    utterance: String,
    persona_override: Option<String>,
    cancel: CancelToken,
) -> mpsc::Receiver<StreamFragment> {
    let (tx, rx) = mpsc::channel::<StreamFragment>(8);

    tokio::spawn(async move {
        let outcome = dispatch_chat(
            &state,
            &caller,
            &external_session_id,
            &utterance,
            persona_override.as_deref(),
        )
        .await;

        match outcome {
            Ok(outcome) => {
                for chunk in split_fragments(&outcome.response, STREAM_FRAGMENT_CHARS) {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if tx.send(StreamFragment::Chunk(chunk)).await.is_err() {
                        // Receiver dropped: the client went away.
                        return;
                    }
                }
                let _ = tx.send(StreamFragment::Done).await;
            }
            Err(e) => {
                state.metrics.record_error(e.kind());
                let _ = tx.send(StreamFragment::Failed(e)).await;
            }
        }
    });

    rx
}

/// Split on char boundaries into fragments of at most `size` chars.
fn split_fragments(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An explicit `character` must name a configured persona; otherwise the
/// deterministic routing rule decides.
fn resolve_persona<'a>(
    state: &'a AppState,
    utterance: &str,
    persona_override: Option<&str>,
) -> Result<&'a str> {
    match persona_override {
        Some(requested) => state
            .router
            .resolve_override(requested)
            .ok_or_else(|| Error::Validation(format!("unknown character \"{requested}\""))),
        None => Ok(state.router.route(utterance)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_respect_char_boundaries() {
        let text = "abcdefgh";
        assert_eq!(split_fragments(text, 3), vec!["abc", "def", "gh"]);
        // Multi-byte chars never split mid-codepoint.
        let text = "héllø wörld";
        let joined: String = split_fragments(text, 4).concat();
        assert_eq!(joined, text);
    }

    #[test]
    fn empty_text_yields_no_fragments() {
        assert!(split_fragments("", 16).is_empty());
    }
}
