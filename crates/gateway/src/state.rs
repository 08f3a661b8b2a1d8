use std::sync::Arc;

use choir_auth::AuthService;
use choir_domain::config::Config;
use choir_domain::metrics::MetricsCollector;
use choir_memory::MemoryFacade;
use choir_personas::{HandlerSet, PersonaRouter, ProviderRegistry};
use choir_plugins::PluginHost;

use crate::dispatch::{CancelMap, QuotaTracker, RateLimiter, RetryPolicy, SessionLockMap, SessionMap};

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, memory facade, auth, LLM providers
/// - **Personas** — router and handler set
/// - **Dispatch** — session map, locks, quota, rate limits, cancellation
/// - **Observability** — the metrics collector
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub memory: Arc<MemoryFacade>,
    pub auth: Arc<AuthService>,
    pub providers: Arc<ProviderRegistry>,

    // ── Personas ──────────────────────────────────────────────────────
    pub router: Arc<PersonaRouter>,
    pub handlers: Arc<HandlerSet>,

    // ── Plugins ───────────────────────────────────────────────────────
    pub plugins: Arc<PluginHost>,

    // ── Dispatch ──────────────────────────────────────────────────────
    pub session_map: Arc<SessionMap>,
    pub session_locks: Arc<SessionLockMap>,
    pub quota: Arc<QuotaTracker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cancel_map: Arc<CancelMap>,
    pub retry_policy: RetryPolicy,

    // ── Observability ─────────────────────────────────────────────────
    pub metrics: Arc<MetricsCollector>,
}
