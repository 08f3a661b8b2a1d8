//! Plugin host: lifecycle and invocation of side capabilities.
//!
//! Plugins move through `Uninitialized → Initializing → Ready`, or land in
//! `Error`/`Disabled`. Execution requires `Ready`, validates parameters,
//! and records a bounded history. One plugin's failure never affects
//! another — errors are contained per entry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use choir_domain::error::{Error, Result};
use choir_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// One-time setup. Failure moves the plugin into `Error`.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Reject malformed parameters before execution.
    fn validate_params(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, params: &Value) -> Result<Value>;

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Uninitialized,
    Initializing,
    Ready,
    Error,
    Disabled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub plugin: String,
    pub success: bool,
    pub elapsed_ms: u64,
    pub params: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    pub status: PluginStatus,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginHostStats {
    pub total_plugins: usize,
    pub ready_plugins: usize,
    pub total_executions: usize,
    pub successful_executions: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Host
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    status: PluginStatus,
    last_error: Option<String>,
}

pub struct PluginHost {
    plugins: RwLock<HashMap<String, PluginEntry>>,
    history: Mutex<VecDeque<ExecutionRecord>>,
    max_history: usize,
}

impl PluginHost {
    pub fn new(max_history: usize) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            max_history,
        }
    }

    /// Register a plugin in `Uninitialized` state. Re-registering a name
    /// replaces the previous plugin.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_owned();
        self.plugins.write().insert(
            name,
            PluginEntry {
                plugin,
                status: PluginStatus::Uninitialized,
                last_error: None,
            },
        );
    }

    /// Initialize one plugin. Failure lands it in `Error` without touching
    /// the others.
    pub async fn initialize(&self, name: &str) -> Result<()> {
        let plugin = {
            let mut plugins = self.plugins.write();
            let entry = plugins
                .get_mut(name)
                .ok_or_else(|| plugin_error(name, "not registered"))?;
            entry.status = PluginStatus::Initializing;
            entry.plugin.clone()
        };

        let outcome = plugin.initialize().await;

        let mut plugins = self.plugins.write();
        if let Some(entry) = plugins.get_mut(name) {
            match &outcome {
                Ok(()) => {
                    entry.status = PluginStatus::Ready;
                    entry.last_error = None;
                }
                Err(e) => {
                    entry.status = PluginStatus::Error;
                    entry.last_error = Some(e.to_string());
                }
            }
        }
        outcome
    }

    /// Initialize every registered plugin, returning per-plugin outcomes.
    pub async fn initialize_all(&self) -> HashMap<String, bool> {
        let names: Vec<String> = self.plugins.read().keys().cloned().collect();
        let mut outcomes = HashMap::new();
        for name in names {
            let ok = self.initialize(&name).await.is_ok();
            outcomes.insert(name, ok);
        }
        outcomes
    }

    /// Execute a plugin: requires `Ready`, validates parameters, records a
    /// history entry either way.
    pub async fn execute(&self, name: &str, params: &Value) -> Result<Value> {
        let plugin = {
            let plugins = self.plugins.read();
            let entry = plugins
                .get(name)
                .ok_or_else(|| plugin_error(name, "not registered"))?;
            if entry.status != PluginStatus::Ready {
                return Err(plugin_error(
                    name,
                    format!("not ready (status: {:?})", entry.status),
                ));
            }
            entry.plugin.clone()
        };

        plugin.validate_params(params)?;

        let start = Instant::now();
        let outcome = plugin.execute(params).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let record = ExecutionRecord {
            plugin: name.to_owned(),
            success: outcome.is_ok(),
            elapsed_ms,
            params: params.clone(),
            result: outcome.as_ref().ok().cloned(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
            timestamp: Utc::now(),
        };
        TraceEvent::PluginExecuted {
            plugin: record.plugin.clone(),
            success: record.success,
            elapsed_ms,
        }
        .emit();
        self.push_history(record);

        outcome
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_status(name, PluginStatus::Ready)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_status(name, PluginStatus::Disabled)
    }

    pub async fn cleanup_all(&self) {
        let plugins: Vec<(String, Arc<dyn Plugin>)> = self
            .plugins
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.plugin.clone()))
            .collect();
        for (name, plugin) in plugins {
            if let Err(e) = plugin.cleanup().await {
                tracing::warn!(plugin = %name, error = %e, "plugin cleanup failed");
            }
        }
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.plugins.read().get(name).map(|e| e.status)
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self
            .plugins
            .read()
            .values()
            .map(|entry| PluginInfo {
                name: entry.plugin.name().to_owned(),
                description: entry.plugin.description().to_owned(),
                status: entry.status,
                last_error: entry.last_error.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// The most recent executions, newest last, optionally filtered by
    /// plugin name.
    pub fn history(&self, limit: usize, plugin: Option<&str>) -> Vec<ExecutionRecord> {
        let history = self.history.lock();
        let filtered: Vec<ExecutionRecord> = history
            .iter()
            .filter(|r| plugin.map_or(true, |p| r.plugin == p))
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].to_vec()
    }

    pub fn stats(&self) -> PluginHostStats {
        let plugins = self.plugins.read();
        let history = self.history.lock();
        PluginHostStats {
            total_plugins: plugins.len(),
            ready_plugins: plugins
                .values()
                .filter(|e| e.status == PluginStatus::Ready)
                .count(),
            total_executions: history.len(),
            successful_executions: history.iter().filter(|r| r.success).count(),
        }
    }

    // ── Private ──────────────────────────────────────────────────────

    fn set_status(&self, name: &str, status: PluginStatus) -> Result<()> {
        let mut plugins = self.plugins.write();
        let entry = plugins
            .get_mut(name)
            .ok_or_else(|| plugin_error(name, "not registered"))?;
        entry.status = status;
        Ok(())
    }

    fn push_history(&self, record: ExecutionRecord) {
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }
}

fn plugin_error(name: &str, message: impl Into<String>) -> Error {
    Error::Plugin {
        plugin: name.to_owned(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A configurable test plugin.
    struct TestPlugin {
        name: String,
        fail_init: bool,
        fail_exec: bool,
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "test plugin"
        }

        async fn initialize(&self) -> Result<()> {
            if self.fail_init {
                Err(plugin_error(&self.name, "init boom"))
            } else {
                Ok(())
            }
        }

        fn validate_params(&self, params: &Value) -> Result<()> {
            if params.get("input").is_none() {
                return Err(Error::Validation("missing \"input\" parameter".into()));
            }
            Ok(())
        }

        async fn execute(&self, params: &Value) -> Result<Value> {
            if self.fail_exec {
                return Err(plugin_error(&self.name, "exec boom"));
            }
            Ok(json!({ "echo": params["input"] }))
        }
    }

    fn plugin(name: &str, fail_init: bool, fail_exec: bool) -> Arc<TestPlugin> {
        Arc::new(TestPlugin {
            name: name.into(),
            fail_init,
            fail_exec,
        })
    }

    #[tokio::test]
    async fn lifecycle_reaches_ready() {
        let host = PluginHost::new(100);
        host.register(plugin("echo", false, false));
        assert_eq!(host.status("echo"), Some(PluginStatus::Uninitialized));

        host.initialize("echo").await.unwrap();
        assert_eq!(host.status("echo"), Some(PluginStatus::Ready));
    }

    #[tokio::test]
    async fn init_failure_isolated_to_one_plugin() {
        let host = PluginHost::new(100);
        host.register(plugin("good", false, false));
        host.register(plugin("bad", true, false));

        let outcomes = host.initialize_all().await;
        assert!(outcomes["good"]);
        assert!(!outcomes["bad"]);
        assert_eq!(host.status("good"), Some(PluginStatus::Ready));
        assert_eq!(host.status("bad"), Some(PluginStatus::Error));

        // The failed plugin does not block the healthy one.
        let result = host.execute("good", &json!({"input": "hi"})).await.unwrap();
        assert_eq!(result["echo"], "hi");
    }

    #[tokio::test]
    async fn execute_requires_ready() {
        let host = PluginHost::new(100);
        host.register(plugin("echo", false, false));

        let err = host.execute("echo", &json!({"input": 1})).await.unwrap_err();
        assert_eq!(err.kind(), "plugin_error");

        host.initialize("echo").await.unwrap();
        host.disable("echo").unwrap();
        assert!(host.execute("echo", &json!({"input": 1})).await.is_err());

        host.enable("echo").unwrap();
        assert!(host.execute("echo", &json!({"input": 1})).await.is_ok());
    }

    #[tokio::test]
    async fn param_validation_runs_before_execute() {
        let host = PluginHost::new(100);
        host.register(plugin("echo", false, false));
        host.initialize("echo").await.unwrap();

        let err = host.execute("echo", &json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        // Validation failures do not produce history entries.
        assert!(host.history(10, None).is_empty());
    }

    #[tokio::test]
    async fn history_records_success_and_failure() {
        let host = PluginHost::new(100);
        host.register(plugin("ok", false, false));
        host.register(plugin("broken", false, true));
        host.initialize_all().await;

        host.execute("ok", &json!({"input": "x"})).await.unwrap();
        let _ = host.execute("broken", &json!({"input": "y"})).await;

        let history = host.history(10, None);
        assert_eq!(history.len(), 2);
        let ok = history.iter().find(|r| r.plugin == "ok").unwrap();
        assert!(ok.success);
        assert!(ok.result.is_some());
        let broken = history.iter().find(|r| r.plugin == "broken").unwrap();
        assert!(!broken.success);
        assert!(broken.error.as_deref().unwrap().contains("exec boom"));

        let filtered = host.history(10, Some("ok"));
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let host = PluginHost::new(5);
        host.register(plugin("echo", false, false));
        host.initialize("echo").await.unwrap();

        for i in 0..10 {
            host.execute("echo", &json!({"input": i})).await.unwrap();
        }
        let history = host.history(100, None);
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].params["input"], 5);
    }

    #[tokio::test]
    async fn stats_summarize_host() {
        let host = PluginHost::new(100);
        host.register(plugin("a", false, false));
        host.register(plugin("b", true, false));
        host.initialize_all().await;
        host.execute("a", &json!({"input": 1})).await.unwrap();

        let stats = host.stats();
        assert_eq!(stats.total_plugins, 2);
        assert_eq!(stats.ready_plugins, 1);
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.successful_executions, 1);
    }

    #[tokio::test]
    async fn unknown_plugin_errors() {
        let host = PluginHost::new(100);
        assert!(host.initialize("ghost").await.is_err());
        assert!(host.execute("ghost", &json!({})).await.is_err());
        assert!(host.enable("ghost").is_err());
    }
}
