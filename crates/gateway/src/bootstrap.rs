//! AppState construction and background-task spawning.
//!
//! [`build_app_state`] validates the config, wires every subsystem, and
//! returns the fully-assembled state. There are no ambient singletons:
//! everything the dispatch core touches is constructed here and passed in.

use std::sync::Arc;
use std::time::Duration;

use choir_auth::{AuthService, PasswordHasher, TokenManager, UserStore};
use choir_domain::config::{Config, ConfigSeverity};
use choir_domain::metrics::MetricsCollector;
use choir_memory::{HotCache, MemoryFacade, RestHotCache};
use choir_personas::{HandlerSet, LlmPersonaHandler, PersonaHandler, PersonaRouter, ProviderRegistry};
use choir_plugins::PluginHost;

use crate::dispatch::{
    CancelMap, QuotaTracker, RateLimiter, RetryPolicy, SessionLockMap, SessionMap,
};
use crate::state::AppState;

/// Interval for the background janitor (TTL cleanup, idle-lock pruning).
const JANITOR_INTERVAL: Duration = Duration::from_secs(300);

pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Observability ────────────────────────────────────────────────
    let metrics = Arc::new(MetricsCollector::new());

    // ── Hot cache (advisory) ─────────────────────────────────────────
    let hot_cache: Option<Arc<dyn HotCache>> = if config.memory.hot_cache.enabled {
        let cache = RestHotCache::from_config(&config.memory.hot_cache)?;
        tracing::info!(url = %config.memory.hot_cache.base_url, "hot cache client ready");
        Some(Arc::new(cache))
    } else {
        None
    };

    // ── Memory facade ────────────────────────────────────────────────
    let memory = Arc::new(MemoryFacade::new(
        &config.memory,
        config.personas.names(),
        hot_cache.clone(),
        metrics.clone(),
    )?);
    memory.initialize_personas()?;
    tracing::info!(
        personas = config.personas.personas.len(),
        "memory facade ready"
    );

    // ── Auth ─────────────────────────────────────────────────────────
    let secret = match std::env::var(&config.auth.secret_env) {
        Ok(secret) if secret.len() >= 32 => secret,
        Ok(_) => anyhow::bail!(
            "{} must hold at least 32 bytes",
            config.auth.secret_env
        ),
        Err(_) => {
            tracing::warn!(
                env = %config.auth.secret_env,
                "no token secret configured — using an ephemeral secret; \
                 tokens will not survive a restart"
            );
            format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            )
        }
    };
    let tokens = TokenManager::new(
        secret.as_bytes(),
        config.auth.access_token_ttl_secs,
        config.auth.refresh_token_ttl_secs,
    )?;
    let users = UserStore::new(config.auth.users_path.clone())?;
    let auth = Arc::new(AuthService::new(
        users,
        PasswordHasher::new(config.auth.bcrypt_cost),
        tokens,
        hot_cache.clone(),
        config.auth.refresh_token_ttl_secs,
        config.auth.admin_emails.clone(),
    ));

    // ── Personas & providers ─────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::from_config(&config.llm)?);
    if providers.is_empty() {
        tracing::info!("no LLM providers configured — replies will be fallback utterances");
    } else {
        tracing::info!(providers = providers.len(), "provider registry ready");
    }

    let mut handlers: Vec<Arc<dyn PersonaHandler>> = Vec::new();
    for persona in &config.personas.personas {
        if let Some(provider) = providers.get(persona.provider.as_deref()) {
            handlers.push(Arc::new(LlmPersonaHandler::new(persona.clone(), provider)));
        }
    }
    let handlers = Arc::new(HandlerSet::new(handlers));
    let router = Arc::new(PersonaRouter::new(config.personas.clone()));

    // ── Plugins ──────────────────────────────────────────────────────
    let plugins = Arc::new(PluginHost::new(config.plugins.max_history));

    // ── Dispatch ─────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        memory,
        auth,
        providers,
        router,
        handlers,
        plugins,
        session_map: Arc::new(SessionMap::new()),
        session_locks: Arc::new(SessionLockMap::new()),
        quota: Arc::new(QuotaTracker::new(hot_cache)),
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
        cancel_map: Arc::new(CancelMap::new()),
        retry_policy: RetryPolicy::from_config(&config.llm.retry),
        metrics,
    };

    Ok(state)
}

/// Spawn the periodic janitor: TTL cleanup on the short- and mid-term
/// tiers, idle session-lock pruning, and stale rate-limit windows.
pub fn spawn_background_tasks(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            match state.memory.cleanup_expired() {
                Ok((short, mid)) if short + mid > 0 => {
                    tracing::debug!(short, mid, "expired records cleaned up");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "cleanup pass failed"),
            }
            state.session_locks.prune_idle();
            state.rate_limiter.prune_stale();
        }
    });
}
