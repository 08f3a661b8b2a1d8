//! Advisory hot-cache collaborator.
//!
//! The mid-term tier reads through this cache and the quota tracker can use
//! it as a shared counter, but every caller has a durable or process-local
//! fallthrough: a dead cache degrades latency, never availability.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use choir_domain::config::HotCacheConfig;
use choir_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Narrow adapter interface over the low-latency cache service.
#[async_trait]
pub trait HotCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Atomically add `delta` to a numeric key, creating it with the given
    /// TTL when absent. Returns the new value.
    async fn incr(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Process-local implementation, used in tests and single-process
/// deployments where no external cache service exists.
#[derive(Default)]
pub struct InMemoryHotCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InMemoryHotCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl HotCache for InMemoryHotCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(
            key.to_owned(),
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64> {
        let current = self
            .live_value(key)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let next = current + delta;
        self.entries.lock().insert(
            key.to_owned(),
            CacheEntry {
                value: Value::from(next),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(next)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// REST client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// REST client for a remote cache service, with bounded retry and
/// exponential back-off on transient (5xx / timeout) failures. 4xx
/// responses are permanent and not retried.
pub struct RestHotCache {
    base_url: String,
    client: Client,
    max_retries: u32,
}

impl RestHotCache {
    pub fn from_config(cfg: &HotCacheConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::HotCacheUnavailable(e.to_string()))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            client,
            max_retries: 2,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/cache/{key}", self.base_url)
    }

    /// Execute a request with retry + exponential back-off on transient
    /// errors.
    async fn execute_with_retry(
        &self,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            match build_request().send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = Some(Error::HotCacheUnavailable(format!(
                        "cache returned {}",
                        resp.status()
                    )));
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    last_err = Some(Error::HotCacheUnavailable(e.to_string()));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::HotCacheUnavailable("request never executed".into())))
    }
}

#[async_trait]
impl HotCache for RestHotCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let url = self.url(key);
        let resp = self
            .execute_with_retry(|| self.client.get(&url))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value = resp
            .json::<Value>()
            .await
            .map_err(|e| Error::HotCacheUnavailable(e.to_string()))?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let url = self.url(key);
        let body = serde_json::json!({
            "value": value,
            "ttl_seconds": ttl.as_secs(),
        });
        self.execute_with_retry(|| self.client.put(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.url(key);
        self.execute_with_retry(|| self.client.delete(&url))
            .await?;
        Ok(())
    }

    async fn incr(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64> {
        let url = format!("{}/incr", self.url(key));
        let body = serde_json::json!({
            "delta": delta,
            "ttl_seconds": ttl.as_secs(),
        });
        let resp = self
            .execute_with_retry(|| self.client.post(&url).json(&body))
            .await?;
        let value = resp
            .json::<Value>()
            .await
            .map_err(|e| Error::HotCacheUnavailable(e.to_string()))?;
        value
            .get("value")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::HotCacheUnavailable("incr response missing value".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip() {
        let cache = InMemoryHotCache::new();
        let value = serde_json::json!({"a": 1});
        cache
            .set("k", &value, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(value));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_expiry() {
        let cache = InMemoryHotCache::new();
        cache
            .set("k", &serde_json::json!(1), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_incr_accumulates() {
        let cache = InMemoryHotCache::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(cache.incr("n", 1, ttl).await.unwrap(), 1);
        assert_eq!(cache.incr("n", 2, ttl).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn rest_client_errors_map_to_unavailable() {
        // Nothing listens on this port; the client must degrade into
        // HotCacheUnavailable rather than panic or hang.
        let cache = RestHotCache::from_config(&HotCacheConfig {
            enabled: true,
            base_url: "http://127.0.0.1:1".into(),
            ttl_seconds: 60,
            timeout_secs: 1,
        })
        .unwrap();
        let err = cache.get("k").await.unwrap_err();
        assert_eq!(err.kind(), "hot_cache_unavailable");
    }
}
