//! The ephemeral conversation buffer: the last N turns of each session,
//! used to build prompt context. FIFO with a fixed cap; process-local.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use choir_domain::types::TurnRecord;

pub struct ConversationBuffer {
    max_turns: usize,
    sessions: Mutex<HashMap<String, VecDeque<TurnRecord>>>,
}

impl ConversationBuffer {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Append a turn to its session's buffer, dropping the oldest turn
    /// once the cap is reached.
    pub fn push(&self, turn: TurnRecord) {
        let mut sessions = self.sessions.lock();
        let buffer = sessions.entry(turn.session_id.clone()).or_default();
        buffer.push_back(turn);
        while buffer.len() > self.max_turns {
            buffer.pop_front();
        }
    }

    /// Remove the most recent turn of a session (ingest rollback).
    pub fn pop_last(&self, session_id: &str) -> Option<TurnRecord> {
        self.sessions.lock().get_mut(session_id)?.pop_back()
    }

    /// The most recent `n` turns (all buffered turns when `n` is `None`).
    pub fn recent(&self, session_id: &str, n: Option<usize>) -> Vec<TurnRecord> {
        let sessions = self.sessions.lock();
        let Some(buffer) = sessions.get(session_id) else {
            return Vec::new();
        };
        let take = n.unwrap_or(buffer.len()).min(buffer.len());
        buffer.iter().skip(buffer.len() - take).cloned().collect()
    }

    /// Render the last `max_turns` turns as `speaker: content` lines.
    pub fn context_string(&self, session_id: &str, max_turns: usize) -> String {
        self.recent(session_id, Some(max_turns))
            .iter()
            .map(|t| format!("{}: {}", t.speaker, t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn turn_count(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .get(session_id)
            .map(|b| b.len())
            .unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Drop a session's buffer. Idempotent.
    pub fn clear_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use choir_domain::types::Speaker;
    use serde_json::Value;

    fn turn(session: &str, index: u64, speaker: Speaker, content: &str) -> TurnRecord {
        TurnRecord {
            session_id: session.into(),
            turn_index: index,
            speaker,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Value::Null,
        }
    }

    #[test]
    fn capped_fifo() {
        let buffer = ConversationBuffer::new(3);
        for i in 0..5 {
            buffer.push(turn("s1", i, Speaker::User, &format!("m{i}")));
        }
        let recent = buffer.recent("s1", None);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m2");
        assert_eq!(recent[2].content, "m4");
    }

    #[test]
    fn sessions_are_isolated() {
        let buffer = ConversationBuffer::new(12);
        buffer.push(turn("a", 0, Speaker::User, "for a"));
        buffer.push(turn("b", 0, Speaker::User, "for b"));
        assert_eq!(buffer.recent("a", None).len(), 1);
        assert_eq!(buffer.recent("a", None)[0].content, "for a");
        assert_eq!(buffer.turn_count("b"), 1);
    }

    #[test]
    fn context_string_formats_speakers() {
        let buffer = ConversationBuffer::new(12);
        buffer.push(turn("s", 0, Speaker::User, "hi"));
        buffer.push(turn("s", 1, Speaker::Persona("lumina".into()), "hello!"));
        assert_eq!(buffer.context_string("s", 6), "user: hi\nlumina: hello!");
    }

    #[test]
    fn pop_last_rolls_back() {
        let buffer = ConversationBuffer::new(12);
        buffer.push(turn("s", 0, Speaker::User, "keep"));
        buffer.push(turn("s", 1, Speaker::User, "drop"));
        let popped = buffer.pop_last("s").unwrap();
        assert_eq!(popped.content, "drop");
        assert_eq!(buffer.turn_count("s"), 1);
    }

    #[test]
    fn clear_is_idempotent() {
        let buffer = ConversationBuffer::new(12);
        buffer.push(turn("s", 0, Speaker::User, "x"));
        buffer.clear_session("s");
        buffer.clear_session("s");
        assert_eq!(buffer.turn_count("s"), 0);
        assert_eq!(buffer.recent("s", None).len(), 0);
    }
}
