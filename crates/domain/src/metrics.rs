//! In-process metrics aggregation.
//!
//! [`MetricsCollector`] is constructed once at startup and passed by `Arc`
//! into the dispatch core and the memory facade; there is no global
//! instance. Recording is counter math under a short lock — no I/O happens
//! on the hot path. Export is on demand (admin surface, session end).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Cap on retained per-call latencies. Old samples are dropped oldest-first
/// so the distribution tracks recent behavior.
const MAX_LATENCY_SAMPLES: usize = 4096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct MetricsInner {
    provider_calls: u64,
    provider_errors: u64,
    provider_retries: u64,
    provider_fallbacks: u64,
    call_latencies_ms: Vec<f64>,

    memory_reads: u64,
    memory_writes: u64,
    memory_errors: u64,

    total_turns: u64,
    user_inputs: u64,
    persona_responses: HashMap<String, u64>,

    total_errors: u64,
    errors_by_kind: HashMap<String, u64>,

    sessions_started: u64,
    sessions_ended: u64,
    first_session_start: Option<DateTime<Utc>>,
    last_session_end: Option<DateTime<Utc>>,
}

/// Aggregates provider, memory, conversation, and error counters.
#[derive(Default)]
pub struct MetricsCollector {
    inner: Mutex<MetricsInner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one provider call attempt that completed (success or error).
    pub fn record_provider_call(&self, duration_ms: f64, success: bool) {
        let mut m = self.inner.lock();
        m.provider_calls += 1;
        if !success {
            m.provider_errors += 1;
        }
        if m.call_latencies_ms.len() >= MAX_LATENCY_SAMPLES {
            m.call_latencies_ms.remove(0);
        }
        m.call_latencies_ms.push(duration_ms);
    }

    /// Record a retried provider attempt.
    pub fn record_provider_retry(&self) {
        self.inner.lock().provider_retries += 1;
    }

    /// Record that a fallback utterance was served instead of a provider
    /// reply.
    pub fn record_provider_fallback(&self) {
        self.inner.lock().provider_fallbacks += 1;
    }

    /// Record a memory tier operation.
    pub fn record_memory_read(&self) {
        self.inner.lock().memory_reads += 1;
    }

    pub fn record_memory_write(&self) {
        self.inner.lock().memory_writes += 1;
    }

    pub fn record_memory_error(&self) {
        self.inner.lock().memory_errors += 1;
    }

    /// Record a conversation turn. `persona` is `None` for user input.
    pub fn record_turn(&self, persona: Option<&str>) {
        let mut m = self.inner.lock();
        m.total_turns += 1;
        match persona {
            Some(name) => {
                *m.persona_responses.entry(name.to_owned()).or_insert(0) += 1;
            }
            None => m.user_inputs += 1,
        }
    }

    /// Record an error by its stable kind token.
    pub fn record_error(&self, kind: &str) {
        let mut m = self.inner.lock();
        m.total_errors += 1;
        *m.errors_by_kind.entry(kind.to_owned()).or_insert(0) += 1;
    }

    pub fn record_session_start(&self) {
        let mut m = self.inner.lock();
        m.sessions_started += 1;
        if m.first_session_start.is_none() {
            m.first_session_start = Some(Utc::now());
        }
    }

    pub fn record_session_end(&self) {
        let mut m = self.inner.lock();
        m.sessions_ended += 1;
        m.last_session_end = Some(Utc::now());
    }

    /// Build a point-in-time summary of everything recorded so far.
    pub fn summary(&self) -> MetricsSummary {
        let m = self.inner.lock();

        let latency = if m.call_latencies_ms.is_empty() {
            LatencySummary::default()
        } else {
            let mut sorted = m.call_latencies_ms.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let sum: f64 = sorted.iter().sum();
            LatencySummary {
                min_ms: sorted[0],
                median_ms: sorted[sorted.len() / 2],
                avg_ms: sum / sorted.len() as f64,
                max_ms: sorted[sorted.len() - 1],
            }
        };

        MetricsSummary {
            provider: ProviderMetrics {
                total_calls: m.provider_calls,
                total_errors: m.provider_errors,
                total_retries: m.provider_retries,
                total_fallbacks: m.provider_fallbacks,
                latency,
            },
            memory: MemoryMetrics {
                total_reads: m.memory_reads,
                total_writes: m.memory_writes,
                total_errors: m.memory_errors,
            },
            conversation: ConversationMetrics {
                total_turns: m.total_turns,
                user_inputs: m.user_inputs,
                persona_responses: m.persona_responses.clone(),
            },
            errors: ErrorMetrics {
                total_errors: m.total_errors,
                by_kind: m.errors_by_kind.clone(),
            },
            sessions: SessionMetrics {
                started: m.sessions_started,
                ended: m.sessions_ended,
                first_start: m.first_session_start,
                last_end: m.last_session_end,
            },
        }
    }

    /// Serialize the current summary to pretty JSON.
    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&self.summary()).unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summary types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Default)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub median_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetrics {
    pub total_calls: u64,
    pub total_errors: u64,
    pub total_retries: u64,
    pub total_fallbacks: u64,
    pub latency: LatencySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryMetrics {
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationMetrics {
    pub total_turns: u64,
    pub user_inputs: u64,
    pub persona_responses: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMetrics {
    pub total_errors: u64,
    pub by_kind: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMetrics {
    pub started: u64,
    pub ended: u64,
    pub first_start: Option<DateTime<Utc>>,
    pub last_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub provider: ProviderMetrics,
    pub memory: MemoryMetrics,
    pub conversation: ConversationMetrics,
    pub errors: ErrorMetrics,
    pub sessions: SessionMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_latency_distribution() {
        let metrics = MetricsCollector::new();
        for ms in [10.0, 20.0, 30.0, 40.0, 100.0] {
            metrics.record_provider_call(ms, true);
        }
        metrics.record_provider_call(50.0, false);

        let summary = metrics.summary();
        assert_eq!(summary.provider.total_calls, 6);
        assert_eq!(summary.provider.total_errors, 1);
        assert_eq!(summary.provider.latency.min_ms, 10.0);
        assert_eq!(summary.provider.latency.max_ms, 100.0);
        assert!((summary.provider.latency.avg_ms - 250.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn fallbacks_and_retries_counted() {
        let metrics = MetricsCollector::new();
        metrics.record_provider_retry();
        metrics.record_provider_retry();
        metrics.record_provider_fallback();

        let summary = metrics.summary();
        assert_eq!(summary.provider.total_retries, 2);
        assert_eq!(summary.provider.total_fallbacks, 1);
    }

    #[test]
    fn turns_split_by_speaker() {
        let metrics = MetricsCollector::new();
        metrics.record_turn(None);
        metrics.record_turn(Some("lumina"));
        metrics.record_turn(Some("lumina"));
        metrics.record_turn(Some("nox"));

        let summary = metrics.summary();
        assert_eq!(summary.conversation.total_turns, 4);
        assert_eq!(summary.conversation.user_inputs, 1);
        assert_eq!(summary.conversation.persona_responses["lumina"], 2);
        assert_eq!(summary.conversation.persona_responses["nox"], 1);
    }

    #[test]
    fn errors_grouped_by_kind() {
        let metrics = MetricsCollector::new();
        metrics.record_error("validation_error");
        metrics.record_error("validation_error");
        metrics.record_error("provider_timeout");

        let summary = metrics.summary();
        assert_eq!(summary.errors.total_errors, 3);
        assert_eq!(summary.errors.by_kind["validation_error"], 2);
        assert_eq!(summary.errors.by_kind["provider_timeout"], 1);
    }

    #[test]
    fn latency_samples_are_bounded() {
        let metrics = MetricsCollector::new();
        for i in 0..(MAX_LATENCY_SAMPLES + 10) {
            metrics.record_provider_call(i as f64, true);
        }
        let m = metrics.inner.lock();
        assert_eq!(m.call_latencies_ms.len(), MAX_LATENCY_SAMPLES);
        // Oldest samples were dropped.
        assert_eq!(m.call_latencies_ms[0], 10.0);
    }

    #[test]
    fn export_is_valid_json() {
        let metrics = MetricsCollector::new();
        metrics.record_memory_write();
        let json = metrics.export_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["memory"]["total_writes"], 1);
    }
}
