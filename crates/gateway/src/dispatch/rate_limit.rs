//! Route-scoped request rate limiting.
//!
//! A fixed window per `(route, key)` pair, keyed by the authenticated user
//! id when available, else the remote address. Orthogonal to the daily
//! quota: this caps arrival rate, not chargeable work.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use choir_domain::config::RateLimitsConfig;
use choir_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Register,
    Login,
    Refresh,
    ChangePassword,
    Chat,
    ChatStream,
    MemorySearch,
    MemoryStore,
}

impl RouteClass {
    fn limit(&self, cfg: &RateLimitsConfig) -> u32 {
        match self {
            RouteClass::Register => cfg.register,
            RouteClass::Login => cfg.login,
            RouteClass::Refresh => cfg.refresh,
            RouteClass::ChangePassword => cfg.change_password,
            RouteClass::Chat => cfg.chat,
            RouteClass::ChatStream => cfg.chat_stream,
            RouteClass::MemorySearch => cfg.memory_search,
            RouteClass::MemoryStore => cfg.memory_store,
        }
    }
}

struct WindowState {
    window_start: Instant,
    count: u32,
}

pub struct RateLimiter {
    config: RateLimitsConfig,
    window: Duration,
    buckets: Mutex<HashMap<(RouteClass, String), WindowState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitsConfig) -> Self {
        let window = Duration::from_secs(config.window_secs);
        Self {
            config,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or refuse one request. Refusals carry `retry_after` seconds
    /// (always ≥ 1) until the window reopens.
    pub fn check(&self, route: RouteClass, key: &str) -> Result<()> {
        let limit = route.limit(&self.config);
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let state = buckets
            .entry((route, key.to_owned()))
            .or_insert(WindowState {
                window_start: now,
                count: 0,
            });

        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }

        if state.count >= limit {
            let elapsed = now.duration_since(state.window_start);
            let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
            return Err(Error::RateLimited { retry_after });
        }

        state.count += 1;
        Ok(())
    }

    /// Drop windows that have long since closed.
    pub fn prune_stale(&self) {
        let now = Instant::now();
        let horizon = self.window * 2;
        self.buckets
            .lock()
            .retain(|_, state| now.duration_since(state.window_start) < horizon);
    }
}
