use serde::Serialize;

/// Structured trace events emitted at runtime. These integrate with the
/// `tracing` crate and are machine-parseable.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    /// Emitted when a client session id is resolved to an internal id.
    SessionResolved {
        user_id: String,
        external_id: String,
        internal_id: String,
        is_new: bool,
    },

    /// Emitted when a session and its records are cleared.
    SessionCleared { internal_id: String },

    /// Emitted when the hot cache fails and a read or write fell through
    /// to durable storage.
    HotCacheDegraded { operation: String, error: String },

    /// Emitted when the quota hot-counter is unreachable and the tracker
    /// fell back to process-local counters.
    QuotaFallback { user_id: String, error: String },

    /// Emitted on each failed provider attempt that will be retried.
    ProviderRetry {
        provider: String,
        attempt: u32,
        error: String,
    },

    /// Emitted when all provider attempts failed and a fallback utterance
    /// was returned instead.
    ProviderFallback { persona: String },

    /// Emitted when a knowledge-base search failed and an empty result was
    /// returned to the caller.
    KnowledgeSearchFailed { query_chars: usize, error: String },

    /// Emitted after a plugin execution completes.
    PluginExecuted {
        plugin: String,
        success: bool,
        elapsed_ms: u64,
    },

    /// Emitted after a short→mid migration pass.
    MemoryMigrated { moved: usize },
}

impl TraceEvent {
    /// Emit this event as a tracing span event.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "choir_event");
    }
}
