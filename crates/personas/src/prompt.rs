//! Prompt assembly for persona handlers.

use choir_domain::config::{PersonaConfig, PersonaRole};
use choir_domain::types::TurnRecord;

use crate::provider::ChatMessage;

/// Render recent turns as `speaker: content` lines for the prompt.
pub fn render_history(history: &[TurnRecord], max_turns: usize) -> String {
    let start = history.len().saturating_sub(max_turns);
    history[start..]
        .iter()
        .map(|t| format!("{}: {}", t.speaker, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The persona's system prompt: character description plus role-specific
/// instructions.
pub fn system_prompt(persona: &PersonaConfig) -> String {
    let role_instructions = match persona.role {
        PersonaRole::Host => {
            "Keep the conversation natural and warm. React to the user's \
             mood, keep replies conversational, and open up new directions \
             when the topic runs dry."
        }
        PersonaRole::Explainer => {
            "Organize the topic before answering: background first, then \
             structure, then the reasoning step by step. Prefer clarity \
             over brevity."
        }
        PersonaRole::Searcher => {
            "Verify before you assert. Prefer the supplied reference \
             material over your own recall, cite what you used, and keep \
             the answer compact."
        }
    };
    format!(
        "You are {}, one of several conversational personas.\n{}\n{}\nReply with the response text only.",
        persona.name, persona.description, role_instructions
    )
}

/// Build the full message list for one turn.
pub fn build_messages(
    persona: &PersonaConfig,
    history: &[TurnRecord],
    utterance: &str,
    supplementary: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt(persona))];

    let rendered = render_history(history, 6);
    if !rendered.is_empty() {
        messages.push(ChatMessage::system(format!(
            "Conversation so far:\n{rendered}"
        )));
    }
    if let Some(context) = supplementary {
        if !context.is_empty() {
            messages.push(ChatMessage::system(format!(
                "Reference material:\n{context}"
            )));
        }
    }
    messages.push(ChatMessage::user(utterance));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use choir_domain::config::PersonasConfig;
    use choir_domain::types::Speaker;
    use serde_json::Value;

    fn turn(speaker: Speaker, content: &str) -> TurnRecord {
        TurnRecord {
            session_id: "s".into(),
            turn_index: 0,
            speaker,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Value::Null,
        }
    }

    #[test]
    fn history_renders_last_n() {
        let history: Vec<TurnRecord> = (0..10)
            .map(|i| turn(Speaker::User, &format!("m{i}")))
            .collect();
        let rendered = render_history(&history, 3);
        assert_eq!(rendered, "user: m7\nuser: m8\nuser: m9");
    }

    #[test]
    fn messages_include_context_and_utterance() {
        let config = PersonasConfig::default();
        let persona = config.get("nox").unwrap();
        let history = vec![turn(Speaker::User, "earlier")];

        let messages = build_messages(persona, &history, "now", Some("doc text"));
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.contains("nox"));
        assert!(messages[1].content.contains("earlier"));
        assert!(messages[2].content.contains("doc text"));
        assert_eq!(messages[3].content, "now");
    }

    #[test]
    fn empty_history_and_context_are_omitted() {
        let config = PersonasConfig::default();
        let persona = config.get("lumina").unwrap();
        let messages = build_messages(persona, &[], "hello", None);
        assert_eq!(messages.len(), 2);
    }
}
