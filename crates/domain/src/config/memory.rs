use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub short_term: ShortTermConfig,
    #[serde(default)]
    pub mid_term: MidTermConfig,
    #[serde(default)]
    pub long_term: LongTermConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub hot_cache: HotCacheConfig,

    /// Conversation buffer capacity, in turns.
    #[serde(default = "d_buffer_turns")]
    pub buffer_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term: ShortTermConfig::default(),
            mid_term: MidTermConfig::default(),
            long_term: LongTermConfig::default(),
            knowledge: KnowledgeConfig::default(),
            hot_cache: HotCacheConfig::default(),
            buffer_turns: d_buffer_turns(),
        }
    }
}

/// Short-term tier: in-process, bounded, TTL'd. Vanishes on restart by
/// design — the mid-term tier is the durable source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermConfig {
    #[serde(default = "d_st_max_items")]
    pub max_items: usize,
    #[serde(default = "d_st_ttl")]
    pub ttl_seconds: u64,
}

impl Default for ShortTermConfig {
    fn default() -> Self {
        Self {
            max_items: d_st_max_items(),
            ttl_seconds: d_st_ttl(),
        }
    }
}

/// Mid-term tier: durable with a bounded in-memory working set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidTermConfig {
    #[serde(default = "d_mt_max_items")]
    pub max_working_set: usize,
    #[serde(default = "d_mt_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "d_mt_path")]
    pub path: PathBuf,
}

impl Default for MidTermConfig {
    fn default() -> Self {
        Self {
            max_working_set: d_mt_max_items(),
            ttl_seconds: d_mt_ttl(),
            path: d_mt_path(),
        }
    }
}

/// Long-term tier: durable, no TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermConfig {
    #[serde(default = "d_lt_path")]
    pub path: PathBuf,
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self { path: d_lt_path() }
    }
}

/// Knowledge base: one file per namespace under `dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "d_kb_dir")]
    pub dir: PathBuf,
    #[serde(default = "d_kb_namespaces")]
    pub namespaces: Vec<String>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            dir: d_kb_dir(),
            namespaces: d_kb_namespaces(),
        }
    }
}

/// Hot cache collaborator in front of the mid-term tier. Advisory: when
/// disabled or unreachable, every caller falls through to durable storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotCacheConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the cache service (used when `enabled`).
    #[serde(default = "d_hc_url")]
    pub base_url: String,
    /// Repopulation horizon for mid-term reads, in seconds (24 hours).
    #[serde(default = "d_hc_ttl")]
    pub ttl_seconds: u64,
    /// Per-request timeout.
    #[serde(default = "d_hc_timeout")]
    pub timeout_secs: u64,
}

impl Default for HotCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: d_hc_url(),
            ttl_seconds: d_hc_ttl(),
            timeout_secs: d_hc_timeout(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_buffer_turns() -> usize {
    12
}
fn d_st_max_items() -> usize {
    100
}
fn d_st_ttl() -> u64 {
    3600
}
fn d_mt_max_items() -> usize {
    1000
}
fn d_mt_ttl() -> u64 {
    86_400 * 30
}
fn d_mt_path() -> PathBuf {
    "data/mid_term.json".into()
}
fn d_lt_path() -> PathBuf {
    "data/long_term.json".into()
}
fn d_kb_dir() -> PathBuf {
    "data/kb".into()
}
fn d_kb_namespaces() -> Vec<String> {
    ["movie", "history", "gossip", "tech", "news"]
        .map(String::from)
        .to_vec()
}
fn d_hc_url() -> String {
    "http://127.0.0.1:6380".into()
}
fn d_hc_ttl() -> u64 {
    86_400
}
fn d_hc_timeout() -> u64 {
    2
}
