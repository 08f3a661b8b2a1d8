//! Long-term tier: durable, no TTL. One content-addressed record per key,
//! persisted as a single JSON map.
//!
//! Two domain facades sit on top: user profiles under `user:<id>` keys and
//! persona KPIs under `persona:<name>:kpi` keys. KPI increments are atomic
//! with respect to concurrent increments of the same persona: the
//! read-modify-write happens under the store's write lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use choir_domain::error::{Error, Result};
use choir_domain::types::{KpiKind, MemoryHit, MemoryItem, MemoryLayer, PersonaKpi};

use crate::knowledge::occurrence_score;
use crate::short_term::{extract_content, extract_session_id};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Counters {
    stores: u64,
    retrievals: u64,
}

pub struct LongTermMemory {
    path: PathBuf,
    records: RwLock<HashMap<String, MemoryItem>>,
    counters: Mutex<Counters>,
}

impl LongTermMemory {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let records: HashMap<String, MemoryItem> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            records = records.len(),
            path = %path.display(),
            "long-term store loaded"
        );

        Ok(Self {
            path,
            records: RwLock::new(records),
            counters: Mutex::new(Counters::default()),
        })
    }

    fn persist(&self, records: &HashMap<String, MemoryItem>) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::memory("long_term", format!("persisting store: {e}")))
    }

    pub fn store(&self, key: &str, value: Value, metadata: Value) -> Result<()> {
        let mut records = self.records.write();
        records.insert(key.to_owned(), MemoryItem::new(key, value, metadata));
        self.persist(&records)?;
        self.counters.lock().stores += 1;
        Ok(())
    }

    pub fn retrieve(&self, key: &str) -> Option<Value> {
        self.counters.lock().retrievals += 1;
        let mut records = self.records.write();
        let item = records.get_mut(key)?;
        item.touch();
        Some(item.value.clone())
    }

    /// Atomic read-modify-write of one record. The closure sees the current
    /// value (or `Value::Null` when absent) and mutates it in place; the
    /// whole operation runs under the write lock.
    pub fn update<F>(&self, key: &str, metadata: Value, mutate: F) -> Result<Value>
    where
        F: FnOnce(&mut Value),
    {
        let mut records = self.records.write();
        let item = records
            .entry(key.to_owned())
            .or_insert_with(|| MemoryItem::new(key, Value::Null, metadata));
        mutate(&mut item.value);
        item.touch();
        let value = item.value.clone();
        self.persist(&records)?;
        Ok(value)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut records = self.records.write();
        let removed = records.remove(key).is_some();
        if removed {
            self.persist(&records)?;
        }
        Ok(removed)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    pub fn clear(&self) -> Result<()> {
        let mut records = self.records.write();
        records.clear();
        self.persist(&records)
    }

    /// Substring search over stored values.
    pub fn search(&self, query: &str, limit: usize) -> Vec<MemoryHit> {
        let records = self.records.read();
        let mut hits = Vec::new();
        for (key, item) in records.iter() {
            let content = extract_content(&item.value);
            let score = occurrence_score(&content, query);
            if score > 0.0 {
                hits.push(MemoryHit {
                    memory_id: key.clone(),
                    content,
                    layer: MemoryLayer::LongTerm,
                    timestamp: item.created_at,
                    relevance_score: score,
                    session_id: extract_session_id(&item.value),
                });
            }
            if hits.len() >= limit {
                break;
            }
        }
        hits
    }

    pub fn stats(&self) -> LongTermStats {
        let records = self.records.read();
        let counters = self.counters.lock();
        LongTermStats {
            current_items: records.len(),
            profiles: records.keys().filter(|k| k.starts_with("user:")).count(),
            kpi_records: records
                .keys()
                .filter(|k| k.starts_with("persona:"))
                .count(),
            stores: counters.stores,
            retrievals: counters.retrievals,
        }
    }

    // ── Profile facade ───────────────────────────────────────────────

    pub fn put_profile(&self, user_id: &str, profile: Value) -> Result<()> {
        let metadata = serde_json::json!({ "type": "user_profile", "user_id": user_id });
        self.store(&format!("user:{user_id}"), profile, metadata)
    }

    pub fn get_profile(&self, user_id: &str) -> Option<Value> {
        self.retrieve(&format!("user:{user_id}"))
    }

    pub fn delete_profile(&self, user_id: &str) -> Result<bool> {
        self.delete(&format!("user:{user_id}"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LongTermStats {
    pub current_items: usize,
    pub profiles: usize,
    pub kpi_records: usize,
    pub stores: u64,
    pub retrievals: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persona KPI facade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn kpi_key(persona: &str) -> String {
    format!("persona:{persona}:kpi")
}

/// Growth counters per persona, living in the long-term tier.
pub struct PersonaKpiStore {
    memory: Arc<LongTermMemory>,
}

impl PersonaKpiStore {
    pub fn new(memory: Arc<LongTermMemory>) -> Self {
        Self { memory }
    }

    /// Create a zeroed KPI record when none exists. Idempotent.
    pub fn initialize(&self, persona: &str) -> Result<PersonaKpi> {
        let key = kpi_key(persona);
        let metadata = serde_json::json!({ "type": "persona_kpi", "persona": persona });
        let persona = persona.to_owned();
        let value = self.memory.update(&key, metadata, move |value| {
            if value.is_null() {
                *value = serde_json::to_value(PersonaKpi::new(persona)).unwrap_or_default();
            }
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Apply a delta to one counter and recompute the level. Atomic with
    /// respect to concurrent increments of the same persona.
    pub fn increment(&self, persona: &str, kind: KpiKind, delta: u64) -> Result<PersonaKpi> {
        let key = kpi_key(persona);
        let metadata = serde_json::json!({ "type": "persona_kpi", "persona": persona });
        let persona_owned = persona.to_owned();
        let value = self.memory.update(&key, metadata, move |value| {
            let mut kpi: PersonaKpi = serde_json::from_value(value.take())
                .unwrap_or_else(|_| PersonaKpi::new(persona_owned));
            kpi.increment(kind, delta);
            *value = serde_json::to_value(kpi).unwrap_or_default();
        })?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn get(&self, persona: &str) -> Result<Option<PersonaKpi>> {
        match self.memory.retrieve(&kpi_key(persona)) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}
