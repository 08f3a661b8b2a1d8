//! The memory facade: the single retrieval/ingest surface above the tiers.
//!
//! Failure contract: turn ingest and KPI updates are fatal (typed errors),
//! knowledge search is best-effort (swallow, trace, return empty), session
//! save/load propagate typed errors. Cross-tier search merges results into
//! a uniform hit shape with a deterministic order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use choir_domain::config::MemoryConfig;
use choir_domain::error::{Error, Result};
use choir_domain::metrics::MetricsCollector;
use choir_domain::trace::TraceEvent;
use choir_domain::types::{
    rank_hits, KpiKind, MemoryHit, MemoryLayer, SessionSummary, Speaker, TurnRecord,
};

use crate::buffer::ConversationBuffer;
use crate::hot_cache::HotCache;
use crate::knowledge::{KnowledgeBase, KnowledgeStats};
use crate::long_term::{LongTermMemory, LongTermStats, PersonaKpiStore};
use crate::mid_term::{MidTermMemory, MidTermStats, SessionInfo};
use crate::short_term::{ShortTermMemory, ShortTermStats};

fn turn_key(session_id: &str, turn_index: u64) -> String {
    format!("turn:{session_id}:{turn_index}")
}

#[derive(Default)]
struct FacadeCounters {
    total_turns: u64,
    total_sessions: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Facade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemoryFacade {
    short_term: ShortTermMemory,
    buffer: ConversationBuffer,
    mid_term: MidTermMemory,
    long_term: Arc<LongTermMemory>,
    kpis: PersonaKpiStore,
    knowledge: KnowledgeBase,
    metrics: Arc<MetricsCollector>,
    /// Persona names allowed as speakers, alongside `user` and `system`.
    allowed_personas: Vec<String>,
    /// Per-session ordered turn log for the current process lifetime.
    turn_log: RwLock<HashMap<String, Vec<TurnRecord>>>,
    counters: Mutex<FacadeCounters>,
}

impl MemoryFacade {
    pub fn new(
        cfg: &MemoryConfig,
        allowed_personas: Vec<String>,
        hot_cache: Option<Arc<dyn HotCache>>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let short_term =
            ShortTermMemory::new(cfg.short_term.max_items, cfg.short_term.ttl_seconds)?;
        let mid_term = MidTermMemory::new(&cfg.mid_term, hot_cache, cfg.hot_cache.ttl_seconds)?;
        let long_term = Arc::new(LongTermMemory::new(cfg.long_term.path.clone())?);
        let kpis = PersonaKpiStore::new(long_term.clone());
        let knowledge = KnowledgeBase::new(cfg.knowledge.dir.clone(), &cfg.knowledge.namespaces)?;

        Ok(Self {
            short_term,
            buffer: ConversationBuffer::new(cfg.buffer_turns),
            mid_term,
            long_term,
            kpis,
            knowledge,
            metrics,
            allowed_personas,
            turn_log: RwLock::new(HashMap::new()),
            counters: Mutex::new(FacadeCounters::default()),
        })
    }

    /// Zero every persona's KPI record if absent.
    pub fn initialize_personas(&self) -> Result<()> {
        for persona in &self.allowed_personas {
            self.kpis.initialize(persona)?;
        }
        Ok(())
    }

    // ── Turn ingest ──────────────────────────────────────────────────

    /// Append one turn: conversation buffer, short-term tier, and the turn
    /// log move together — the ingest either succeeds end-to-end or leaves
    /// no trace. Idempotent on `(session_id, turn_index)`: re-ingesting an
    /// index that already exists returns the stored record unchanged.
    pub fn ingest_turn(
        &self,
        session_id: &str,
        speaker: Speaker,
        content: &str,
        metadata: Value,
        turn_index: Option<u64>,
    ) -> Result<TurnRecord> {
        if let Speaker::Persona(name) = &speaker {
            if !self.allowed_personas.iter().any(|p| p == name) {
                return Err(Error::Validation(format!(
                    "unknown speaker \"{name}\""
                )));
            }
        }

        let mut log = self.turn_log.write();
        let turns = log.entry(session_id.to_owned()).or_default();
        let next_index = turns.len() as u64;

        let index = match turn_index {
            Some(index) if index < next_index => {
                // Already ingested (at-least-once delivery).
                return Ok(turns[index as usize].clone());
            }
            Some(index) if index > next_index => {
                return Err(Error::Validation(format!(
                    "turn index {index} leaves a gap (next is {next_index})"
                )));
            }
            _ => next_index,
        };

        let turn = TurnRecord {
            session_id: session_id.to_owned(),
            turn_index: index,
            speaker: speaker.clone(),
            content: content.to_owned(),
            timestamp: Utc::now(),
            metadata: metadata.clone(),
        };

        self.buffer.push(turn.clone());
        let stored = self.short_term.store(
            &turn_key(session_id, index),
            serde_json::json!({
                "session_id": session_id,
                "speaker": speaker,
                "content": content,
                "metadata": metadata,
            }),
            serde_json::json!({ "type": "turn" }),
        );
        if let Err(e) = stored {
            // Roll back the buffer append so no partial write is visible.
            self.buffer.pop_last(session_id);
            self.metrics.record_memory_error();
            return Err(e);
        }

        turns.push(turn.clone());
        self.counters.lock().total_turns += 1;
        self.metrics.record_memory_write();
        match &turn.speaker {
            Speaker::User => self.metrics.record_turn(None),
            other => self.metrics.record_turn(Some(other.as_str())),
        }
        Ok(turn)
    }

    /// Ordered turns for a session. Falls back to the mid-term payload
    /// when the process-local log is empty (e.g. after a restart).
    pub async fn session_history(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TurnRecord>> {
        let local: Vec<TurnRecord> = {
            let log = self.turn_log.read();
            log.get(session_id).cloned().unwrap_or_default()
        };
        let turns = if local.is_empty() {
            match self.load_session(session_id).await? {
                Some(summary) => serde_json::from_value::<Vec<TurnRecord>>(
                    summary.payload.get("turns").cloned().unwrap_or(Value::Null),
                )
                .unwrap_or_default(),
                None => Vec::new(),
            }
        } else {
            local
        };
        self.metrics.record_memory_read();
        Ok(turns.into_iter().skip(offset).take(limit).collect())
    }

    /// The last `max_turns` buffered turns, for prompt context.
    pub fn recent_context(&self, session_id: &str, max_turns: usize) -> Vec<TurnRecord> {
        self.buffer.recent(session_id, Some(max_turns))
    }

    pub fn turn_count(&self, session_id: &str) -> usize {
        self.turn_log
            .read()
            .get(session_id)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Compute the session summary from the turn log and write it to the
    /// mid-term tier.
    pub async fn save_session(
        &self,
        session_id: &str,
        owner_id: &str,
        metadata: Value,
    ) -> Result<SessionSummary> {
        let history: Vec<TurnRecord> = {
            let log = self.turn_log.read();
            log.get(session_id).cloned().unwrap_or_default()
        };
        let payload = serde_json::json!({
            "turns": history,
            "metadata": metadata,
        });
        let summary = SessionSummary::from_history(session_id, owner_id, &history, payload);

        let is_new = !self.mid_term.exists(&format!("session:{session_id}"));
        self.mid_term.store_session_summary(&summary).await?;
        if is_new {
            self.counters.lock().total_sessions += 1;
        }
        self.metrics.record_memory_write();
        Ok(summary)
    }

    pub async fn load_session(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        self.metrics.record_memory_read();
        self.mid_term.retrieve_session_summary(session_id).await
    }

    pub fn list_sessions(&self, limit: usize) -> Vec<SessionInfo> {
        self.mid_term.list_sessions(limit)
    }

    /// Remove every record of a session: buffer, turn log, short-term turn
    /// keys, and the mid-term summary. Idempotent.
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.buffer.clear_session(session_id);
        self.turn_log.write().remove(session_id);
        self.short_term.delete_prefix(&format!("turn:{session_id}:"));
        self.mid_term.delete_session_summary(session_id).await?;
        TraceEvent::SessionCleared {
            internal_id: session_id.to_owned(),
        }
        .emit();
        Ok(())
    }

    // ── Persona KPIs ─────────────────────────────────────────────────

    /// Delegate to the long-term KPI store. Fatal on failure.
    pub fn update_persona_kpi(
        &self,
        persona: &str,
        kind: KpiKind,
        delta: Option<u64>,
    ) -> Result<choir_domain::types::PersonaKpi> {
        let updated = self.kpis.increment(persona, kind, delta.unwrap_or(1))?;
        self.metrics.record_memory_write();
        Ok(updated)
    }

    pub fn persona_kpi(&self, persona: &str) -> Result<Option<choir_domain::types::PersonaKpi>> {
        self.kpis.get(persona)
    }

    // ── Search ───────────────────────────────────────────────────────

    /// Best-effort knowledge search: a backend failure is traced and
    /// reported as an empty result, never propagated — the caller may be
    /// inside a response-generation path that must still produce a reply.
    pub fn search_knowledge(
        &self,
        query: &str,
        namespace: Option<&str>,
        limit: usize,
    ) -> Vec<MemoryHit> {
        match self.knowledge.search(query, namespace, limit) {
            Ok(hits) => {
                self.metrics.record_memory_read();
                hits
            }
            Err(e) => {
                TraceEvent::KnowledgeSearchFailed {
                    query_chars: query.chars().count(),
                    error: e.to_string(),
                }
                .emit();
                self.metrics.record_memory_error();
                Vec::new()
            }
        }
    }

    /// Fan out across the named layers, merge into the uniform hit shape,
    /// and order by descending score with the `(layer, memory_id)`
    /// ascending tiebreak. The combined result is capped at `limit`.
    pub fn search_memory(
        &self,
        query: &str,
        layers: &[MemoryLayer],
        limit: usize,
    ) -> Vec<MemoryHit> {
        let mut hits = Vec::new();
        for layer in layers {
            match layer {
                MemoryLayer::ShortTerm => hits.extend(self.short_term.search(query, limit)),
                MemoryLayer::MidTerm => hits.extend(self.mid_term.search(query, limit)),
                MemoryLayer::LongTerm => hits.extend(self.long_term.search(query, limit)),
                MemoryLayer::KnowledgeBase => {
                    hits.extend(self.search_knowledge(query, None, limit))
                }
            }
        }
        self.metrics.record_memory_read();
        rank_hits(&mut hits, limit);
        hits
    }

    // ── Direct record storage ────────────────────────────────────────

    /// Store a free-standing record in one tier. Returns the minted
    /// `memory_id` (layer-prefixed so deletion can route back).
    pub async fn store_memory(
        &self,
        layer: MemoryLayer,
        content: &str,
        session_id: Option<&str>,
        metadata: Value,
    ) -> Result<String> {
        let memory_id = format!("{}:{}", layer.as_str(), Uuid::new_v4());
        let value = serde_json::json!({
            "content": content,
            "session_id": session_id,
            "metadata": metadata.clone(),
        });
        match layer {
            MemoryLayer::ShortTerm => self.short_term.store(&memory_id, value, Value::Null)?,
            MemoryLayer::MidTerm => self.mid_term.store(&memory_id, value, Value::Null).await?,
            MemoryLayer::LongTerm => self.long_term.store(&memory_id, value, Value::Null)?,
            MemoryLayer::KnowledgeBase => {
                let namespace = metadata
                    .get("namespace")
                    .and_then(Value::as_str)
                    .unwrap_or("general")
                    .to_owned();
                // Documents have no value wrapper, so the session scope
                // rides in the document metadata.
                let mut doc_metadata = if metadata.is_null() {
                    serde_json::json!({})
                } else {
                    metadata
                };
                if let (Some(sid), Some(map)) = (session_id, doc_metadata.as_object_mut()) {
                    map.insert("session_id".to_owned(), Value::from(sid));
                }
                self.knowledge
                    .add_document(&namespace, &memory_id, content, doc_metadata)?;
            }
        }
        self.metrics.record_memory_write();
        Ok(memory_id)
    }

    /// Delete a record by its layer-prefixed id.
    pub async fn delete_memory(&self, memory_id: &str) -> Result<bool> {
        let layer = memory_id
            .split(':')
            .next()
            .and_then(MemoryLayer::parse)
            .ok_or_else(|| {
                Error::Validation(format!("malformed memory id \"{memory_id}\""))
            })?;
        let removed = match layer {
            MemoryLayer::ShortTerm => self.short_term.delete(memory_id),
            MemoryLayer::MidTerm => self.mid_term.delete(memory_id).await?,
            MemoryLayer::LongTerm => self.long_term.delete(memory_id)?,
            MemoryLayer::KnowledgeBase => self.knowledge.delete_by_doc_id(memory_id)?,
        };
        Ok(removed)
    }

    // ── Knowledge passthrough ────────────────────────────────────────

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    // ── Migration ────────────────────────────────────────────────────

    /// Force-migrate every live short-term record into the mid-term tier.
    pub async fn flush_short_to_mid(&self) -> Result<usize> {
        let items = self.short_term.drain_items();
        let moved = items.len();
        for item in items {
            self.mid_term
                .store(&item.key, item.value, item.metadata)
                .await?;
        }
        TraceEvent::MemoryMigrated { moved }.emit();
        Ok(moved)
    }

    /// Drop expired records from the TTL'd tiers. Returns the per-tier
    /// removal counts `(short_term, mid_term)`.
    pub fn cleanup_expired(&self) -> Result<(usize, usize)> {
        let short = self.short_term.cleanup_expired();
        let mid = self.mid_term.cleanup_expired()?;
        Ok((short, mid))
    }

    // ── Statistics ───────────────────────────────────────────────────

    pub fn memory_stats(&self) -> MemoryStats {
        let counters = self.counters.lock();
        MemoryStats {
            short_term: self.short_term.stats(),
            mid_term: self.mid_term.stats(),
            long_term: self.long_term.stats(),
            knowledge_base: self.knowledge.stats(),
            buffered_sessions: self.buffer.session_count(),
            total_turns: counters.total_turns,
            total_sessions: counters.total_sessions,
        }
    }
}

/// Per-tier counts plus the facade's global counters.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub short_term: ShortTermStats,
    pub mid_term: MidTermStats,
    pub long_term: LongTermStats,
    pub knowledge_base: KnowledgeStats,
    pub buffered_sessions: usize,
    pub total_turns: u64,
    pub total_sessions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use choir_domain::config::{
        KnowledgeConfig, LongTermConfig, MemoryConfig, MidTermConfig, ShortTermConfig,
    };
    use tempfile::TempDir;

    fn facade(dir: &TempDir) -> MemoryFacade {
        let cfg = MemoryConfig {
            short_term: ShortTermConfig {
                max_items: 100,
                ttl_seconds: 3600,
            },
            mid_term: MidTermConfig {
                max_working_set: 100,
                ttl_seconds: 86_400,
                path: dir.path().join("mid.json"),
            },
            long_term: LongTermConfig {
                path: dir.path().join("long.json"),
            },
            knowledge: KnowledgeConfig {
                dir: dir.path().join("kb"),
                namespaces: vec!["tech".into()],
            },
            hot_cache: Default::default(),
            buffer_turns: 12,
        };
        MemoryFacade::new(
            &cfg,
            vec!["lumina".into(), "claris".into(), "nox".into()],
            None,
            Arc::new(MetricsCollector::new()),
        )
        .unwrap()
    }

    fn user_turn(facade: &MemoryFacade, session: &str, content: &str) -> TurnRecord {
        facade
            .ingest_turn(session, Speaker::User, content, Value::Null, None)
            .unwrap()
    }

    #[tokio::test]
    async fn ingest_then_history_sees_the_turn() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        user_turn(&facade, "s1", "hello");
        let history = facade.session_history("s1", 10, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[0].turn_index, 0);
    }

    #[test]
    fn unknown_speaker_rejected() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        let err = facade
            .ingest_turn(
                "s1",
                Speaker::Persona("impostor".into()),
                "hi",
                Value::Null,
                None,
            )
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(facade.turn_count("s1"), 0);
    }

    #[test]
    fn ingest_is_idempotent_on_turn_index() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        let first = facade
            .ingest_turn("s1", Speaker::User, "once", Value::Null, Some(0))
            .unwrap();
        let replay = facade
            .ingest_turn("s1", Speaker::User, "changed", Value::Null, Some(0))
            .unwrap();
        assert_eq!(replay.content, first.content);
        assert_eq!(facade.turn_count("s1"), 1);

        // A gap is a validation error.
        let err = facade
            .ingest_turn("s1", Speaker::User, "gap", Value::Null, Some(5))
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn save_then_load_round_trips_turn_count() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        user_turn(&facade, "s1", "one");
        facade
            .ingest_turn(
                "s1",
                Speaker::Persona("lumina".into()),
                "two",
                Value::Null,
                None,
            )
            .unwrap();

        let saved = facade
            .save_session("s1", "u1", Value::Null)
            .await
            .unwrap();
        assert_eq!(saved.turn_count, 2);

        let loaded = facade.load_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.turn_count, 2);
        assert_eq!(loaded.owner_id, "u1");
        assert_eq!(loaded.speaker_histogram["user"], 1);
        assert_eq!(loaded.speaker_histogram["lumina"], 1);
    }

    #[tokio::test]
    async fn clear_session_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        user_turn(&facade, "s1", "gone soon");
        facade.save_session("s1", "u1", Value::Null).await.unwrap();

        facade.clear_session("s1").await.unwrap();
        facade.clear_session("s1").await.unwrap();

        assert_eq!(facade.turn_count("s1"), 0);
        assert!(facade.load_session("s1").await.unwrap().is_none());
        assert!(facade
            .session_history("s1", 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn kpi_update_defaults_to_one() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        facade.initialize_personas().unwrap();
        let kpi = facade
            .update_persona_kpi("nox", KpiKind::SearchSuccess, None)
            .unwrap();
        assert_eq!(kpi.search_success, 1);
    }

    #[tokio::test]
    async fn cross_tier_search_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        facade
            .store_memory(MemoryLayer::ShortTerm, "shared phrase", None, Value::Null)
            .await
            .unwrap();
        facade
            .store_memory(MemoryLayer::LongTerm, "shared phrase", None, Value::Null)
            .await
            .unwrap();

        let layers = [MemoryLayer::ShortTerm, MemoryLayer::LongTerm];
        let first = facade.search_memory("shared phrase", &layers, 10);
        let second = facade.search_memory("shared phrase", &layers, 10);

        assert_eq!(first.len(), 2);
        // Equal scores: long_term sorts before short_term (layer ascending).
        assert_eq!(first[0].layer, MemoryLayer::LongTerm);
        assert_eq!(first[1].layer, MemoryLayer::ShortTerm);
        let ids: Vec<_> = first.iter().map(|h| h.memory_id.clone()).collect();
        let ids2: Vec<_> = second.iter().map(|h| h.memory_id.clone()).collect();
        assert_eq!(ids, ids2);
    }

    #[tokio::test]
    async fn session_scoped_records_carry_their_session() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        facade
            .store_memory(
                MemoryLayer::ShortTerm,
                "scoped note",
                Some("user_u1_s1"),
                Value::Null,
            )
            .await
            .unwrap();
        facade
            .store_memory(MemoryLayer::LongTerm, "scoped note", None, Value::Null)
            .await
            .unwrap();
        facade
            .store_memory(
                MemoryLayer::KnowledgeBase,
                "scoped note",
                Some("user_u1_s1"),
                serde_json::json!({ "namespace": "tech" }),
            )
            .await
            .unwrap();

        let hits = facade.search_memory("scoped note", &MemoryLayer::ALL, 10);
        assert_eq!(hits.len(), 3);
        let scoped: Vec<_> = hits
            .iter()
            .filter(|h| h.session_id.as_deref() == Some("user_u1_s1"))
            .collect();
        assert_eq!(scoped.len(), 2);
        assert!(hits
            .iter()
            .any(|h| h.layer == MemoryLayer::LongTerm && h.session_id.is_none()));
    }

    #[tokio::test]
    async fn ingested_turns_carry_their_session() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        user_turn(&facade, "user_u1_s1", "remember the weather");

        let hits = facade.search_memory("weather", &[MemoryLayer::ShortTerm], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].session_id.as_deref(), Some("user_u1_s1"));
    }

    #[tokio::test]
    async fn store_and_delete_memory_by_id() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        let id = facade
            .store_memory(MemoryLayer::MidTerm, "to be removed", None, Value::Null)
            .await
            .unwrap();
        assert!(id.starts_with("mid_term:"));
        assert!(facade.delete_memory(&id).await.unwrap());
        assert!(!facade.delete_memory(&id).await.unwrap());

        let err = facade.delete_memory("nonsense").await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn knowledge_search_is_best_effort() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        // No matching documents: empty result, never an error.
        assert!(facade.search_knowledge("anything", None, 5).is_empty());

        facade
            .knowledge()
            .add_document("tech", "d1", "rust ownership", Value::Null)
            .unwrap();
        assert_eq!(facade.search_knowledge("ownership", None, 5).len(), 1);
    }

    #[tokio::test]
    async fn flush_migrates_short_to_mid() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        user_turn(&facade, "s1", "migrate me");
        let moved = facade.flush_short_to_mid().await.unwrap();
        assert_eq!(moved, 1);
        assert_eq!(facade.memory_stats().short_term.current_items, 0);
        let hits = facade.search_memory("migrate me", &[MemoryLayer::MidTerm], 10);
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn stats_track_totals() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        user_turn(&facade, "s1", "a");
        user_turn(&facade, "s2", "b");
        facade.save_session("s1", "u1", Value::Null).await.unwrap();
        facade.save_session("s1", "u1", Value::Null).await.unwrap();

        let stats = facade.memory_stats();
        assert_eq!(stats.total_turns, 2);
        // Saving the same session twice counts one session.
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.buffered_sessions, 2);
    }
}
