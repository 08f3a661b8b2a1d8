//! Mid-term tier: the durable session store.
//!
//! A JSON-file-backed map with a bounded in-memory working set (LRU by
//! access). Writes are write-through; reads consult the advisory hot cache
//! first and repopulate it with a 24-hour horizon. Records expire 30 days
//! after creation (configurable) and are deleted from both layers on read.
//! A dead hot cache degrades latency only — reads always fall through to
//! durable storage.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use choir_domain::config::MidTermConfig;
use choir_domain::error::{Error, Result};
use choir_domain::trace::TraceEvent;
use choir_domain::types::{MemoryHit, MemoryItem, MemoryLayer, SessionSummary};

use crate::hot_cache::HotCache;
use crate::short_term::{extract_content, extract_session_id};
use crate::knowledge::occurrence_score;

fn cache_key(key: &str) -> String {
    format!("mid_term:{key}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    durable: HashMap<String, MemoryItem>,
    working: LruCache<String, ()>,
}

#[derive(Default)]
struct Counters {
    stores: u64,
    retrievals: u64,
    deletions: u64,
    expirations: u64,
    hot_hits: u64,
    hot_misses: u64,
}

pub struct MidTermMemory {
    path: PathBuf,
    ttl_seconds: u64,
    max_working_set: usize,
    hot_cache: Option<Arc<dyn HotCache>>,
    hot_cache_ttl: Duration,
    inner: RwLock<Inner>,
    counters: Mutex<Counters>,
}

impl MidTermMemory {
    /// Load or create the store at `cfg.path`.
    pub fn new(
        cfg: &MidTermConfig,
        hot_cache: Option<Arc<dyn HotCache>>,
        hot_cache_ttl_secs: u64,
    ) -> Result<Self> {
        let cap = NonZeroUsize::new(cfg.max_working_set).ok_or_else(|| {
            Error::memory("mid_term", "max_working_set must be greater than 0")
        })?;

        if let Some(parent) = cfg.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let durable: HashMap<String, MemoryItem> = if cfg.path.exists() {
            let raw = std::fs::read_to_string(&cfg.path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            records = durable.len(),
            path = %cfg.path.display(),
            hot_cache = hot_cache.is_some(),
            "mid-term store loaded"
        );

        let mut working = LruCache::new(cap);
        for key in durable.keys() {
            working.put(key.clone(), ());
        }

        Ok(Self {
            path: cfg.path.clone(),
            ttl_seconds: cfg.ttl_seconds,
            max_working_set: cfg.max_working_set,
            hot_cache,
            hot_cache_ttl: Duration::from_secs(hot_cache_ttl_secs),
            inner: RwLock::new(Inner { durable, working }),
            counters: Mutex::new(Counters::default()),
        })
    }

    fn persist(&self, durable: &HashMap<String, MemoryItem>) -> Result<()> {
        let json = serde_json::to_string_pretty(durable)?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::memory("mid_term", format!("persisting store: {e}")))
    }

    /// Store a value. The durable map and the file are updated together;
    /// the working set evicts its least-recently-accessed key past the
    /// bound, leaving the durable record intact.
    pub async fn store(&self, key: &str, value: Value, metadata: Value) -> Result<()> {
        let item = MemoryItem::new(key, value, metadata);
        {
            let mut inner = self.inner.write();
            inner.durable.insert(key.to_owned(), item.clone());
            inner.working.put(key.to_owned(), ());
            self.persist(&inner.durable)?;
        }
        self.counters.lock().stores += 1;
        self.cache_set(key, &item).await;
        Ok(())
    }

    /// Retrieve a value: hot cache first, then durable. Expired records
    /// are removed from both layers and reported absent.
    pub async fn retrieve(&self, key: &str) -> Result<Option<Value>> {
        self.counters.lock().retrievals += 1;
        let now = Utc::now();

        if let Some(cache) = &self.hot_cache {
            match cache.get(&cache_key(key)).await {
                Ok(Some(raw)) => match serde_json::from_value::<MemoryItem>(raw) {
                    Ok(item) if !self.expired(&item, now) => {
                        self.counters.lock().hot_hits += 1;
                        self.touch_durable(key);
                        return Ok(Some(item.value));
                    }
                    // Expired or malformed: fall through to the durable
                    // path, which owns deletion.
                    _ => self.counters.lock().hot_misses += 1,
                },
                Ok(None) => self.counters.lock().hot_misses += 1,
                Err(e) => {
                    TraceEvent::HotCacheDegraded {
                        operation: "get".into(),
                        error: e.to_string(),
                    }
                    .emit();
                    self.counters.lock().hot_misses += 1;
                }
            }
        }

        let live = {
            let mut inner = self.inner.write();
            let expired = inner
                .durable
                .get(key)
                .map(|item| item.age_seconds(now) > self.ttl_seconds as i64);
            match expired {
                None => return Ok(None),
                Some(true) => {
                    inner.durable.remove(key);
                    inner.working.pop(key);
                    self.persist(&inner.durable)?;
                    None
                }
                Some(false) => {
                    let cloned = match inner.durable.get_mut(key) {
                        Some(item) => {
                            item.touch();
                            item.clone()
                        }
                        None => return Ok(None),
                    };
                    inner.working.put(key.to_owned(), ());
                    Some(cloned)
                }
            }
        };

        match live {
            Some(item) => {
                self.cache_set(key, &item).await;
                Ok(Some(item.value))
            }
            None => {
                self.counters.lock().expirations += 1;
                self.cache_delete(key).await;
                Ok(None)
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner.durable.remove(key).is_some();
            inner.working.pop(key);
            if removed {
                self.persist(&inner.durable)?;
            }
            removed
        };
        if removed {
            self.counters.lock().deletions += 1;
            self.cache_delete(key).await;
        }
        Ok(removed)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.inner.read().durable.contains_key(key)
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.durable.clear();
        inner.working.clear();
        self.persist(&inner.durable)
    }

    /// Drop every record past its TTL from the durable layer. O(n).
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .durable
            .iter()
            .filter(|(_, item)| item.age_seconds(now) > self.ttl_seconds as i64)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.durable.remove(key);
            inner.working.pop(key);
        }
        if !expired.is_empty() {
            self.persist(&inner.durable)?;
        }
        self.counters.lock().expirations += expired.len() as u64;
        Ok(expired.len())
    }

    /// Substring search over live durable records.
    pub fn search(&self, query: &str, limit: usize) -> Vec<MemoryHit> {
        let now = Utc::now();
        let inner = self.inner.read();
        let mut hits = Vec::new();
        for (key, item) in inner.durable.iter() {
            if self.expired(item, now) {
                continue;
            }
            let content = extract_content(&item.value);
            let score = occurrence_score(&content, query);
            if score > 0.0 {
                hits.push(MemoryHit {
                    memory_id: key.clone(),
                    content,
                    layer: MemoryLayer::MidTerm,
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

    pub fn stats(&self) -> MidTermStats {
        let inner = self.inner.read();
        let counters = self.counters.lock();
        MidTermStats {
            current_items: inner.durable.len(),
            working_set_items: inner.working.len(),
            max_working_set: self.max_working_set,
            ttl_seconds: self.ttl_seconds,
            stores: counters.stores,
            retrievals: counters.retrievals,
            deletions: counters.deletions,
            expirations: counters.expirations,
            hot_hits: counters.hot_hits,
            hot_misses: counters.hot_misses,
        }
    }

    // ── Session facade ───────────────────────────────────────────────

    pub async fn store_session_summary(&self, summary: &SessionSummary) -> Result<()> {
        let key = format!("session:{}", summary.session_id);
        let value = serde_json::to_value(summary)?;
        let metadata = serde_json::json!({
            "type": "session_summary",
            "session_id": summary.session_id,
        });
        self.store(&key, value, metadata).await
    }

    pub async fn retrieve_session_summary(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionSummary>> {
        let key = format!("session:{session_id}");
        match self.retrieve(&key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_session_summary(&self, session_id: &str) -> Result<bool> {
        self.delete(&format!("session:{session_id}")).await
    }

    /// Most recently accessed sessions, newest first.
    pub fn list_sessions(&self, limit: usize) -> Vec<SessionInfo> {
        let inner = self.inner.read();
        let mut sessions: Vec<SessionInfo> = inner
            .durable
            .iter()
            .filter_map(|(key, item)| {
                let session_id = key.strip_prefix("session:")?;
                Some(SessionInfo {
                    session_id: session_id.to_owned(),
                    created_at: item.created_at,
                    accessed_at: item.accessed_at,
                    access_count: item.access_count,
                })
            })
            .collect();
        sessions.sort_by(|a, b| b.accessed_at.cmp(&a.accessed_at));
        sessions.truncate(limit);
        sessions
    }

    // ── Private ──────────────────────────────────────────────────────

    fn expired(&self, item: &MemoryItem, now: DateTime<Utc>) -> bool {
        item.age_seconds(now) > self.ttl_seconds as i64
    }

    fn touch_durable(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(item) = inner.durable.get_mut(key) {
            item.touch();
        }
        inner.working.put(key.to_owned(), ());
    }

    async fn cache_set(&self, key: &str, item: &MemoryItem) {
        let Some(cache) = &self.hot_cache else { return };
        let Ok(value) = serde_json::to_value(item) else {
            return;
        };
        if let Err(e) = cache.set(&cache_key(key), &value, self.hot_cache_ttl).await {
            TraceEvent::HotCacheDegraded {
                operation: "set".into(),
                error: e.to_string(),
            }
            .emit();
        }
    }

    async fn cache_delete(&self, key: &str) {
        let Some(cache) = &self.hot_cache else { return };
        if let Err(e) = cache.delete(&cache_key(key)).await {
            TraceEvent::HotCacheDegraded {
                operation: "delete".into(),
                error: e.to_string(),
            }
            .emit();
        }
    }
}

/// One row of `list_sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MidTermStats {
    pub current_items: usize,
    pub working_set_items: usize,
    pub max_working_set: usize,
    pub ttl_seconds: u64,
    pub stores: u64,
    pub retrievals: u64,
    pub deletions: u64,
    pub expirations: u64,
    pub hot_hits: u64,
    pub hot_misses: u64,
}
