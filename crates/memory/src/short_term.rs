//! Short-term tier: an in-process, bounded, TTL'd cache.
//!
//! Eviction is LRU by access; reads past the TTL delete the item and count
//! as a miss. The tier vanishes on restart by design — the mid-term tier is
//! the durable source of truth.

use std::num::NonZeroUsize;

use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use choir_domain::error::{Error, Result};
use choir_domain::types::{MemoryHit, MemoryItem, MemoryLayer};

use crate::knowledge::occurrence_score;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    cache: LruCache<String, MemoryItem>,
    hits: u64,
    misses: u64,
    stores: u64,
    deletions: u64,
}

/// In-process ordered map from key to [`MemoryItem`], bounded by
/// `max_items` and per-item TTL.
pub struct ShortTermMemory {
    ttl_seconds: u64,
    max_items: usize,
    inner: Mutex<Inner>,
}

impl ShortTermMemory {
    pub fn new(max_items: usize, ttl_seconds: u64) -> Result<Self> {
        let cap = NonZeroUsize::new(max_items)
            .ok_or_else(|| Error::memory("short_term", "max_items must be greater than 0"))?;
        Ok(Self {
            ttl_seconds,
            max_items,
            inner: Mutex::new(Inner {
                cache: LruCache::new(cap),
                hits: 0,
                misses: 0,
                stores: 0,
                deletions: 0,
            }),
        })
    }

    /// Store a value. When the tier is full, the least-recently accessed
    /// item is dropped to make room.
    pub fn store(&self, key: &str, value: Value, metadata: Value) -> Result<()> {
        let item = MemoryItem::new(key, value, metadata);
        let mut inner = self.inner.lock();
        inner.cache.put(key.to_owned(), item);
        inner.stores += 1;
        Ok(())
    }

    /// Retrieve a value: refreshes the access metadata on hit; expired
    /// items are deleted on read and count as a miss.
    pub fn retrieve(&self, key: &str) -> Option<Value> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let expired = inner
            .cache
            .get(key)
            .map(|item| item.age_seconds(now) > self.ttl_seconds as i64);
        match expired {
            None => {
                inner.misses += 1;
                None
            }
            Some(true) => {
                inner.cache.pop(key);
                inner.misses += 1;
                None
            }
            Some(false) => {
                inner.hits += 1;
                let item = inner.cache.get_mut(key)?;
                item.touch();
                Some(item.value.clone())
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.cache.pop(key).is_some();
        if removed {
            inner.deletions += 1;
        }
        removed
    }

    /// Remove every key with the given prefix. Returns the removed count.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            inner.cache.pop(key);
            inner.deletions += 1;
        }
        keys.len()
    }

    /// Presence check; does not refresh recency.
    pub fn exists(&self, key: &str) -> bool {
        self.inner.lock().cache.peek(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().cache.clear();
    }

    /// All current keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .cache
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop every item past its TTL. O(n).
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .cache
            .iter()
            .filter(|(_, item)| item.age_seconds(now) > self.ttl_seconds as i64)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.cache.pop(key);
        }
        expired.len()
    }

    /// Remove and return every live item (used by the short→mid migration).
    pub fn drain_items(&self) -> Vec<MemoryItem> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let mut items = Vec::with_capacity(inner.cache.len());
        while let Some((_, item)) = inner.cache.pop_lru() {
            if item.age_seconds(now) <= self.ttl_seconds as i64 {
                items.push(item);
            }
        }
        items
    }

    /// Substring search over stored values. Does not refresh recency.
    pub fn search(&self, query: &str, limit: usize) -> Vec<MemoryHit> {
        let inner = self.inner.lock();
        let mut hits = Vec::new();
        for (key, item) in inner.cache.iter() {
            let content = extract_content(&item.value);
            let score = occurrence_score(&content, query);
            if score > 0.0 {
                hits.push(MemoryHit {
                    memory_id: key.clone(),
                    content,
                    layer: MemoryLayer::ShortTerm,
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

    pub fn stats(&self) -> ShortTermStats {
        let inner = self.inner.lock();
        let retrievals = inner.hits + inner.misses;
        ShortTermStats {
            current_items: inner.cache.len(),
            max_items: self.max_items,
            ttl_seconds: self.ttl_seconds,
            hits: inner.hits,
            misses: inner.misses,
            retrievals,
            stores: inner.stores,
            deletions: inner.deletions,
            hit_rate: if retrievals > 0 {
                inner.hits as f64 / retrievals as f64
            } else {
                0.0
            },
        }
    }
}

/// Pull searchable text out of a stored value: the `content` field when the
/// value is our turn/record shape, else the JSON rendering.
pub(crate) fn extract_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("content").and_then(Value::as_str) {
            Some(content) => content.to_owned(),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

/// Pull the owning session id out of a stored value, when present. Turn
/// records, direct memory records, and session summaries all carry a
/// top-level `session_id`.
pub(crate) fn extract_session_id(value: &Value) -> Option<String> {
    value
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Hit/miss counters since process start. `hits + misses == retrievals` at
/// every observation point.
#[derive(Debug, Clone, Serialize)]
pub struct ShortTermStats {
    pub current_items: usize,
    pub max_items: usize,
    pub ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
    pub retrievals: u64,
    pub stores: u64,
    pub deletions: u64,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(max: usize, ttl: u64) -> ShortTermMemory {
        ShortTermMemory::new(max, ttl).unwrap()
    }

    #[test]
    fn store_and_retrieve() {
        let mem = store(10, 60);
        mem.store("k1", json!({"content": "hello"}), Value::Null).unwrap();
        assert_eq!(mem.retrieve("k1").unwrap()["content"], "hello");
        assert!(mem.retrieve("missing").is_none());
    }

    #[test]
    fn eviction_drops_least_recently_accessed() {
        let mem = store(2, 60);
        mem.store("a", json!(1), Value::Null).unwrap();
        mem.store("b", json!(2), Value::Null).unwrap();
        // Access "a" so "b" becomes the LRU entry.
        mem.retrieve("a");
        mem.store("c", json!(3), Value::Null).unwrap();

        assert!(mem.exists("a"));
        assert!(!mem.exists("b"));
        assert!(mem.exists("c"));
    }

    #[test]
    fn expired_item_deleted_on_read() {
        let mem = store(10, 0);
        mem.store("k", json!(1), Value::Null).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(mem.retrieve("k").is_none());
        assert!(!mem.exists("k"));
    }

    #[test]
    fn hit_miss_counters_sum_to_retrievals() {
        let mem = store(10, 60);
        mem.store("k", json!(1), Value::Null).unwrap();
        mem.retrieve("k");
        mem.retrieve("k");
        mem.retrieve("gone");

        let stats = mem.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.misses, stats.retrievals);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn access_count_increments_on_hit() {
        let mem = store(10, 60);
        mem.store("k", json!(1), Value::Null).unwrap();
        mem.retrieve("k");
        mem.retrieve("k");
        let inner = mem.inner.lock();
        assert_eq!(inner.cache.peek("k").unwrap().access_count, 2);
    }

    #[test]
    fn delete_and_clear() {
        let mem = store(10, 60);
        mem.store("k1", json!(1), Value::Null).unwrap();
        mem.store("k2", json!(2), Value::Null).unwrap();
        assert!(mem.delete("k1"));
        assert!(!mem.delete("k1"));
        mem.clear();
        assert!(mem.keys().is_empty());
    }

    #[test]
    fn delete_prefix_scopes_to_session() {
        let mem = store(10, 60);
        mem.store("turn:s1:0", json!(1), Value::Null).unwrap();
        mem.store("turn:s1:1", json!(2), Value::Null).unwrap();
        mem.store("turn:s2:0", json!(3), Value::Null).unwrap();
        assert_eq!(mem.delete_prefix("turn:s1:"), 2);
        assert!(mem.exists("turn:s2:0"));
    }

    #[test]
    fn cleanup_expired_reports_count() {
        let mem = store(10, 0);
        mem.store("a", json!(1), Value::Null).unwrap();
        mem.store("b", json!(2), Value::Null).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(mem.cleanup_expired(), 2);
        assert_eq!(mem.stats().current_items, 0);
    }

    #[test]
    fn search_matches_content_field() {
        let mem = store(10, 60);
        mem.store("t1", json!({"content": "the weather is nice"}), Value::Null)
            .unwrap();
        mem.store("t2", json!({"content": "unrelated"}), Value::Null)
            .unwrap();
        let hits = mem.search("weather", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_id, "t1");
        assert_eq!(hits[0].layer, MemoryLayer::ShortTerm);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(ShortTermMemory::new(0, 60).is_err());
    }
}
