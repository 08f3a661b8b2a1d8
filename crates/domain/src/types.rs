//! Core data model shared by the memory tiers, the dispatch core, and the
//! API layer.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory item
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single stored record in any memory tier. The value is opaque to the
/// store; tiers only read it back out for search and migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

impl MemoryItem {
    pub fn new(key: impl Into<String>, value: Value, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            metadata,
            created_at: now,
            accessed_at: now,
            access_count: 0,
        }
    }

    /// Record an access: bump the access counter and timestamp.
    /// Keeps the invariant `created_at <= accessed_at`.
    pub fn touch(&mut self) {
        self.accessed_at = Utc::now();
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Seconds elapsed since the item was created.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Speaker / turn record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who produced a turn: the end user, one of the configured personas, or
/// the system itself. Serialized as a plain string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Speaker {
    User,
    System,
    Persona(String),
}

impl Speaker {
    pub fn as_str(&self) -> &str {
        match self {
            Speaker::User => "user",
            Speaker::System => "system",
            Speaker::Persona(name) => name,
        }
    }

    /// Parse a speaker string. Anything that is not `user` or `system` is
    /// treated as a persona name; validation against the configured persona
    /// allowlist happens at ingest.
    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Speaker::User,
            "system" => Speaker::System,
            other => Speaker::Persona(other.to_owned()),
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Speaker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Speaker {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Speaker::parse(&s))
    }
}

/// One turn of a conversation, owned by its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub turn_index: u64,
    pub speaker: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregate record for one session, stored in the mid-term tier. Only the
/// owner may read or modify it; ownership is enforced upstream because the
/// session id already carries the owner scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turn_count: u64,
    #[serde(default)]
    pub speaker_histogram: HashMap<String, u64>,
    #[serde(default)]
    pub characters_used: u64,
    #[serde(default)]
    pub payload: Value,
}

impl SessionSummary {
    /// Build a summary from a slice of turns.
    pub fn from_history(
        session_id: &str,
        owner_id: &str,
        history: &[TurnRecord],
        payload: Value,
    ) -> Self {
        let now = Utc::now();
        let created_at = history.first().map(|t| t.timestamp).unwrap_or(now);
        let last_activity = history.last().map(|t| t.timestamp).unwrap_or(now);

        let mut speaker_histogram: HashMap<String, u64> = HashMap::new();
        let mut characters_used = 0u64;
        for turn in history {
            *speaker_histogram
                .entry(turn.speaker.as_str().to_owned())
                .or_insert(0) += 1;
            characters_used += turn.content.chars().count() as u64;
        }

        Self {
            session_id: session_id.to_owned(),
            owner_id: owner_id.to_owned(),
            created_at,
            last_activity,
            turn_count: history.len() as u64,
            speaker_histogram,
            characters_used,
            payload,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persona KPI
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which KPI counter an increment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiKind {
    ThumbsUp,
    AnswerHits,
    SearchSuccess,
    TotalResponses,
}

/// Growth counters for one persona. `level` is derived and recomputed on
/// every increment: `level = floor(sqrt((thumbs_up + answer_hits +
/// search_success) / 10))`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersonaKpi {
    pub persona: String,
    #[serde(default)]
    pub thumbs_up: u64,
    #[serde(default)]
    pub answer_hits: u64,
    #[serde(default)]
    pub search_success: u64,
    #[serde(default)]
    pub total_responses: u64,
    #[serde(default)]
    pub level: u32,
}

impl PersonaKpi {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            ..Self::default()
        }
    }

    /// Apply a delta to one counter and recompute the level.
    pub fn increment(&mut self, kind: KpiKind, delta: u64) {
        match kind {
            KpiKind::ThumbsUp => self.thumbs_up += delta,
            KpiKind::AnswerHits => self.answer_hits += delta,
            KpiKind::SearchSuccess => self.search_success += delta,
            KpiKind::TotalResponses => self.total_responses += delta,
        }
        self.level = Self::level_for(self.thumbs_up + self.answer_hits + self.search_success);
    }

    fn level_for(total: u64) -> u32 {
        ((total as f64 / 10.0).sqrt()).floor() as u32
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A corpus-global document, unique by `(namespace, doc_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub namespace: String,
    pub doc_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cross-tier search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The searchable memory layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    ShortTerm,
    MidTerm,
    LongTerm,
    KnowledgeBase,
}

impl MemoryLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLayer::ShortTerm => "short_term",
            MemoryLayer::MidTerm => "mid_term",
            MemoryLayer::LongTerm => "long_term",
            MemoryLayer::KnowledgeBase => "knowledge_base",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "short_term" => Some(MemoryLayer::ShortTerm),
            "mid_term" => Some(MemoryLayer::MidTerm),
            "long_term" => Some(MemoryLayer::LongTerm),
            "knowledge_base" => Some(MemoryLayer::KnowledgeBase),
            _ => None,
        }
    }

    pub const ALL: [MemoryLayer; 4] = [
        MemoryLayer::ShortTerm,
        MemoryLayer::MidTerm,
        MemoryLayer::LongTerm,
        MemoryLayer::KnowledgeBase,
    ];
}

impl fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single ranked result from a memory search, uniform across tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub memory_id: String,
    pub content: String,
    pub layer: MemoryLayer,
    pub timestamp: DateTime<Utc>,
    pub relevance_score: f64,
    /// The owning internal session id, when the record has one. Session
    /// scoping in search filters on this field.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Order hits by descending score, then ascending `(layer, memory_id)`.
/// This tiebreak is part of the search contract: identical queries against
/// identical state must return identical ordered lists.
pub fn rank_hits(hits: &mut Vec<MemoryHit>, limit: usize) {
    hits.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.layer.as_str().cmp(b.layer.as_str()))
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
    hits.truncate(limit);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quota snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A user's daily usage counter. Resets at 00:00 UTC of the following day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub user_id: String,
    pub calendar_day_utc: NaiveDate,
    pub used: u64,
    pub reset_at: DateTime<Utc>,
}

/// 00:00 UTC of the day after `day`.
pub fn quota_reset_at(day: NaiveDate) -> DateTime<Utc> {
    let next = day.succ_opt().unwrap_or(day);
    next.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_item_touch_preserves_ordering() {
        let mut item = MemoryItem::new("k", serde_json::json!("v"), Value::Null);
        assert_eq!(item.access_count, 0);
        item.touch();
        item.touch();
        assert_eq!(item.access_count, 2);
        assert!(item.created_at <= item.accessed_at);
    }

    #[test]
    fn speaker_round_trips_as_string() {
        assert_eq!(Speaker::parse("user"), Speaker::User);
        assert_eq!(Speaker::parse("system"), Speaker::System);
        assert_eq!(Speaker::parse("nox"), Speaker::Persona("nox".into()));

        let json = serde_json::to_string(&Speaker::Persona("claris".into())).unwrap();
        assert_eq!(json, "\"claris\"");
        let back: Speaker = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Speaker::Persona("claris".into()));
    }

    #[test]
    fn session_summary_counts_speakers_and_chars() {
        let turns = vec![
            turn(0, Speaker::User, "hello"),
            turn(1, Speaker::Persona("lumina".into()), "hi there"),
            turn(2, Speaker::User, "bye"),
        ];
        let summary = SessionSummary::from_history("s1", "u1", &turns, Value::Null);
        assert_eq!(summary.turn_count, 3);
        assert_eq!(summary.speaker_histogram["user"], 2);
        assert_eq!(summary.speaker_histogram["lumina"], 1);
        assert_eq!(summary.characters_used, 5 + 8 + 3);
    }

    #[test]
    fn kpi_level_follows_sqrt_law() {
        let mut kpi = PersonaKpi::new("lumina");
        kpi.increment(KpiKind::ThumbsUp, 9);
        assert_eq!(kpi.level, 0); // 9/10 < 1

        kpi.increment(KpiKind::AnswerHits, 1);
        assert_eq!(kpi.level, 1); // 10/10 = 1

        kpi.increment(KpiKind::SearchSuccess, 30);
        assert_eq!(kpi.level, 2); // 40/10 = 4, sqrt = 2

        // level^2 * 10 <= total < (level+1)^2 * 10
        let total = kpi.thumbs_up + kpi.answer_hits + kpi.search_success;
        let level = kpi.level as u64;
        assert!(level * level * 10 <= total);
        assert!(total < (level + 1) * (level + 1) * 10);
    }

    #[test]
    fn total_responses_does_not_change_level() {
        let mut kpi = PersonaKpi::new("nox");
        kpi.increment(KpiKind::TotalResponses, 1000);
        assert_eq!(kpi.level, 0);
    }

    #[test]
    fn rank_hits_orders_by_score_then_layer_then_id() {
        let mut hits = vec![
            hit("b", MemoryLayer::LongTerm, 1.0),
            hit("a", MemoryLayer::ShortTerm, 1.0),
            hit("c", MemoryLayer::ShortTerm, 2.0),
            hit("a", MemoryLayer::LongTerm, 1.0),
        ];
        rank_hits(&mut hits, 10);
        let order: Vec<(String, MemoryLayer)> = hits
            .iter()
            .map(|h| (h.memory_id.clone(), h.layer))
            .collect();
        assert_eq!(
            order,
            vec![
                ("c".into(), MemoryLayer::ShortTerm),
                ("a".into(), MemoryLayer::LongTerm),
                ("b".into(), MemoryLayer::LongTerm),
                ("a".into(), MemoryLayer::ShortTerm),
            ]
        );
    }

    #[test]
    fn rank_hits_caps_at_limit() {
        let mut hits = (0..20)
            .map(|i| hit(&format!("h{i:02}"), MemoryLayer::ShortTerm, i as f64))
            .collect::<Vec<_>>();
        rank_hits(&mut hits, 5);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].memory_id, "h19");
    }

    #[test]
    fn quota_reset_is_next_utc_midnight() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let reset = quota_reset_at(day);
        assert_eq!(reset.to_rfc3339(), "2025-03-15T00:00:00+00:00");
    }

    fn turn(index: u64, speaker: Speaker, content: &str) -> TurnRecord {
        TurnRecord {
            session_id: "s1".into(),
            turn_index: index,
            speaker,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Value::Null,
        }
    }

    fn hit(id: &str, layer: MemoryLayer, score: f64) -> MemoryHit {
        MemoryHit {
            memory_id: id.into(),
            content: String::new(),
            layer,
            timestamp: Utc::now(),
            relevance_score: score,
            session_id: None,
        }
    }
}
