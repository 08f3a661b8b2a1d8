//! Per-user daily quota of chargeable operations.
//!
//! Counters are keyed by `(user, UTC calendar day)` and reset lazily: the
//! first observation of a new day sees a zero counter. When a hot-counter
//! collaborator is configured it is consulted first (so replicas share one
//! counter); on failure the tracker falls back to process-local counters
//! and records the degradation — it never blocks traffic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use choir_domain::error::{Error, Result};
use choir_domain::trace::TraceEvent;
use choir_domain::types::quota_reset_at;
use choir_memory::HotCache;

/// Hot-counter keys embed the day, so a new day starts at zero without
/// any coordinated reset.
fn counter_key(user_id: &str, day: NaiveDate) -> String {
    format!("quota:{user_id}:{day}")
}

/// Keep day-scoped counters alive slightly past their day.
const COUNTER_TTL: Duration = Duration::from_secs(86_400 * 2);

struct DailyUsage {
    date: NaiveDate,
    used: u64,
}

/// Surfaced with quota refusals and in chat metadata.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaInfo {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: chrono::DateTime<chrono::Utc>,
}

pub struct QuotaTracker {
    hot_cache: Option<Arc<dyn HotCache>>,
    local: Mutex<HashMap<String, DailyUsage>>,
}

impl QuotaTracker {
    pub fn new(hot_cache: Option<Arc<dyn HotCache>>) -> Self {
        Self {
            hot_cache,
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Check the user against their daily limit. `Err(QuotaExhausted)`
    /// carries `(used, limit, reset_at)` for the refusal envelope.
    pub async fn check(&self, user_id: &str, limit: u64) -> Result<QuotaInfo> {
        let info = self.info(user_id, limit).await;
        if info.used >= limit {
            return Err(Error::QuotaExhausted {
                used: info.used,
                limit,
                reset_at: info.reset_at,
            });
        }
        Ok(info)
    }

    /// Charge one chargeable operation. Called once the dispatch reaches
    /// `Invoked`; failures before that point charge nothing.
    pub async fn charge(&self, user_id: &str) -> u64 {
        let today = Utc::now().date_naive();

        if let Some(cache) = &self.hot_cache {
            match cache.incr(&counter_key(user_id, today), 1, COUNTER_TTL).await {
                Ok(used) => {
                    // Mirror locally so a later cache outage stays accurate
                    // within this process.
                    self.set_local(user_id, today, used);
                    return used;
                }
                Err(e) => {
                    TraceEvent::QuotaFallback {
                        user_id: user_id.to_owned(),
                        error: e.to_string(),
                    }
                    .emit();
                }
            }
        }

        let mut local = self.local.lock();
        let entry = local.entry(user_id.to_owned()).or_insert(DailyUsage {
            date: today,
            used: 0,
        });
        if entry.date != today {
            entry.date = today;
            entry.used = 0;
        }
        entry.used += 1;
        entry.used
    }

    /// Current usage snapshot for a user.
    pub async fn info(&self, user_id: &str, limit: u64) -> QuotaInfo {
        let today = Utc::now().date_naive();
        let used = self.current_used(user_id, today).await;
        QuotaInfo {
            used,
            limit,
            remaining: limit.saturating_sub(used),
            reset_at: quota_reset_at(today),
        }
    }

    /// Forget a user's local counter (account deletion).
    pub fn forget(&self, user_id: &str) {
        self.local.lock().remove(user_id);
    }

    // ── Private ──────────────────────────────────────────────────────

    async fn current_used(&self, user_id: &str, today: NaiveDate) -> u64 {
        if let Some(cache) = &self.hot_cache {
            match cache.get(&counter_key(user_id, today)).await {
                Ok(Some(value)) => {
                    let used = value.as_u64().unwrap_or(0);
                    self.set_local(user_id, today, used);
                    return used;
                }
                Ok(None) => return 0,
                Err(e) => {
                    TraceEvent::QuotaFallback {
                        user_id: user_id.to_owned(),
                        error: e.to_string(),
                    }
                    .emit();
                }
            }
        }

        let mut local = self.local.lock();
        match local.get_mut(user_id) {
            Some(entry) if entry.date == today => entry.used,
            Some(entry) => {
                // Lazy reset: first observation of a new UTC day.
                entry.date = today;
                entry.used = 0;
                0
            }
            None => 0,
        }
    }

    fn set_local(&self, user_id: &str, date: NaiveDate, used: u64) {
        self.local
            .lock()
            .insert(user_id.to_owned(), DailyUsage { date, used });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choir_memory::InMemoryHotCache;
    use serde_json::Value;

    #[tokio::test]
    async fn counts_toward_limit() {
        let tracker = QuotaTracker::new(None);
        for expected in 1..=3 {
            tracker.check("u1", 3).await.unwrap();
            assert_eq!(tracker.charge("u1").await, expected);
        }
        let err = tracker.check("u1", 3).await.unwrap_err();
        match err {
            Error::QuotaExhausted { used, limit, .. } => {
                assert_eq!(used, 3);
                assert_eq!(limit, 3);
            }
            other => panic!("expected QuotaExhausted, got {other:?}"),
        }

        let info = tracker.info("u1", 3).await;
        assert_eq!(info.remaining, 0);
        assert!(info.reset_at > Utc::now());
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let tracker = QuotaTracker::new(None);
        tracker.charge("u1").await;
        tracker.charge("u1").await;
        assert_eq!(tracker.info("u1", 10).await.used, 2);
        assert_eq!(tracker.info("u2", 10).await.used, 0);
    }

    #[tokio::test]
    async fn stale_day_resets_lazily() {
        let tracker = QuotaTracker::new(None);
        let yesterday = Utc::now().date_naive().pred_opt().unwrap();
        tracker.set_local("u1", yesterday, 99);

        // First observation of the new day sees zero before incrementing.
        let info = tracker.info("u1", 10).await;
        assert_eq!(info.used, 0);
        assert_eq!(tracker.charge("u1").await, 1);
    }

    #[tokio::test]
    async fn hot_counter_is_shared_and_day_scoped() {
        let cache = Arc::new(InMemoryHotCache::new());
        let a = QuotaTracker::new(Some(cache.clone()));
        let b = QuotaTracker::new(Some(cache.clone()));

        a.charge("u1").await;
        b.charge("u1").await;
        assert_eq!(a.info("u1", 10).await.used, 2);

        let today = Utc::now().date_naive();
        let raw = cache.get(&counter_key("u1", today)).await.unwrap().unwrap();
        assert_eq!(raw, Value::from(2u64));
    }

    #[tokio::test]
    async fn dead_hot_counter_falls_back_locally() {
        use async_trait::async_trait;

        struct DeadCache;

        #[async_trait]
        impl HotCache for DeadCache {
            async fn get(&self, _: &str) -> Result<Option<Value>> {
                Err(Error::HotCacheUnavailable("down".into()))
            }
            async fn set(&self, _: &str, _: &Value, _: Duration) -> Result<()> {
                Err(Error::HotCacheUnavailable("down".into()))
            }
            async fn delete(&self, _: &str) -> Result<()> {
                Err(Error::HotCacheUnavailable("down".into()))
            }
            async fn incr(&self, _: &str, _: u64, _: Duration) -> Result<u64> {
                Err(Error::HotCacheUnavailable("down".into()))
            }
        }

        let tracker = QuotaTracker::new(Some(Arc::new(DeadCache)));
        assert_eq!(tracker.charge("u1").await, 1);
        assert_eq!(tracker.charge("u1").await, 2);
        assert_eq!(tracker.info("u1", 10).await.used, 2);
        assert!(tracker.check("u1", 10).await.is_ok());
    }
}
