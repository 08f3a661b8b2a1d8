//! Knowledge base tier: a finite set of namespaces, each mapping `doc_id`
//! to a document. One JSON blob per namespace on disk.
//!
//! Search ranks by substring containment. The ranking is deterministic and
//! stable: score descending, then `(namespace, doc_id)` ascending — the
//! tiebreak is part of the contract, not an implementation detail.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use choir_domain::error::{Error, Result};
use choir_domain::types::{KnowledgeDocument, MemoryHit, MemoryLayer};

/// Deterministic relevance score: the number of case-insensitive
/// occurrences of `query` in `content`. Empty queries never match.
pub fn occurrence_score(content: &str, query: &str) -> f64 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    content.to_lowercase().matches(&query).count() as f64
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Namespaced document store. Namespaces use `BTreeMap` so iteration order
/// (and therefore search tiebreaks) never depends on hash state.
pub struct KnowledgeBase {
    dir: PathBuf,
    namespaces: RwLock<BTreeMap<String, BTreeMap<String, KnowledgeDocument>>>,
}

impl KnowledgeBase {
    /// Load or create the store under `dir`, seeding the configured
    /// namespaces. Additional namespaces found on disk are loaded too.
    pub fn new(dir: PathBuf, configured: &[String]) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;

        let mut namespaces: BTreeMap<String, BTreeMap<String, KnowledgeDocument>> =
            BTreeMap::new();
        for ns in configured {
            namespaces.insert(ns.clone(), BTreeMap::new());
        }

        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(ns) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path)?;
            let docs: BTreeMap<String, KnowledgeDocument> =
                serde_json::from_str(&raw).unwrap_or_default();
            namespaces.insert(ns.to_owned(), docs);
        }

        tracing::info!(
            namespaces = namespaces.len(),
            path = %dir.display(),
            "knowledge base loaded"
        );

        Ok(Self {
            dir,
            namespaces: RwLock::new(namespaces),
        })
    }

    fn save_namespace(
        &self,
        namespace: &str,
        docs: &BTreeMap<String, KnowledgeDocument>,
    ) -> Result<()> {
        let path = self.dir.join(format!("{namespace}.json"));
        let json = serde_json::to_string_pretty(docs)?;
        std::fs::write(&path, json)
            .map_err(|e| Error::memory("knowledge_base", format!("persisting {namespace}: {e}")))
    }

    /// Insert or replace a document. `created_at` survives updates.
    pub fn add_document(
        &self,
        namespace: &str,
        doc_id: &str,
        content: &str,
        metadata: Value,
    ) -> Result<KnowledgeDocument> {
        let now = Utc::now();
        let mut namespaces = self.namespaces.write();
        let docs = namespaces.entry(namespace.to_owned()).or_default();

        let created_at = docs.get(doc_id).map(|d| d.created_at).unwrap_or(now);
        let doc = KnowledgeDocument {
            namespace: namespace.to_owned(),
            doc_id: doc_id.to_owned(),
            content: content.to_owned(),
            metadata,
            created_at,
            updated_at: now,
        };
        docs.insert(doc_id.to_owned(), doc.clone());
        self.save_namespace(namespace, docs)?;
        Ok(doc)
    }

    /// Insert a batch of `(doc_id, content, metadata)` into one namespace.
    pub fn bulk_add(&self, namespace: &str, docs: Vec<(String, String, Value)>) -> Result<usize> {
        let mut added = 0;
        for (doc_id, content, metadata) in docs {
            self.add_document(namespace, &doc_id, &content, metadata)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn get(&self, namespace: &str, doc_id: &str) -> Option<KnowledgeDocument> {
        self.namespaces.read().get(namespace)?.get(doc_id).cloned()
    }

    pub fn delete(&self, namespace: &str, doc_id: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write();
        let Some(docs) = namespaces.get_mut(namespace) else {
            return Ok(false);
        };
        let removed = docs.remove(doc_id).is_some();
        if removed {
            self.save_namespace(namespace, docs)?;
        }
        Ok(removed)
    }

    /// Delete a document by id alone, scanning namespaces in order.
    pub fn delete_by_doc_id(&self, doc_id: &str) -> Result<bool> {
        let ns = {
            let namespaces = self.namespaces.read();
            namespaces
                .iter()
                .find(|(_, docs)| docs.contains_key(doc_id))
                .map(|(ns, _)| ns.clone())
        };
        match ns {
            Some(ns) => self.delete(&ns, doc_id),
            None => Ok(false),
        }
    }

    /// Rank documents by substring containment. Results are ordered by
    /// score descending, then `(namespace, doc_id)` ascending, and capped
    /// at `limit`.
    pub fn search(
        &self,
        query: &str,
        namespace: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryHit>> {
        let namespaces = self.namespaces.read();
        let mut hits: Vec<(f64, String, String, MemoryHit)> = Vec::new();

        for (ns, docs) in namespaces.iter() {
            if namespace.is_some_and(|wanted| wanted != ns) {
                continue;
            }
            for (doc_id, doc) in docs {
                let score = occurrence_score(&doc.content, query);
                if score > 0.0 {
                    hits.push((
                        score,
                        ns.clone(),
                        doc_id.clone(),
                        MemoryHit {
                            memory_id: format!("{ns}/{doc_id}"),
                            content: doc.content.clone(),
                            layer: MemoryLayer::KnowledgeBase,
                            timestamp: doc.updated_at,
                            relevance_score: score,
                            session_id: doc
                                .metadata
                                .get("session_id")
                                .and_then(Value::as_str)
                                .map(str::to_owned),
                        },
                    ));
                }
            }
        }

        hits.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        Ok(hits.into_iter().take(limit).map(|(_, _, _, h)| h).collect())
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.read().keys().cloned().collect()
    }

    pub fn stats(&self) -> KnowledgeStats {
        let namespaces = self.namespaces.read();
        let per_namespace: HashMap<String, usize> = namespaces
            .iter()
            .map(|(ns, docs)| (ns.clone(), docs.len()))
            .collect();
        KnowledgeStats {
            total_documents: per_namespace.values().sum(),
            namespaces: per_namespace,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub total_documents: usize,
    pub namespaces: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn kb(dir: &TempDir) -> KnowledgeBase {
        KnowledgeBase::new(
            dir.path().to_path_buf(),
            &["tech".to_string(), "news".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn occurrence_scoring() {
        assert_eq!(occurrence_score("rust rust rust", "rust"), 3.0);
        assert_eq!(occurrence_score("Rust is great", "RUST"), 1.0);
        assert_eq!(occurrence_score("no match", "rust"), 0.0);
        assert_eq!(occurrence_score("anything", ""), 0.0);
        assert_eq!(occurrence_score("anything", "   "), 0.0);
    }

    #[test]
    fn add_get_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let kb = kb(&dir);
        kb.add_document("tech", "d1", "rust memory safety", Value::Null)
            .unwrap();
        assert!(kb.get("tech", "d1").is_some());
        assert!(kb.delete("tech", "d1").unwrap());
        assert!(!kb.delete("tech", "d1").unwrap());
        assert!(kb.get("tech", "d1").is_none());
    }

    #[test]
    fn update_preserves_created_at() {
        let dir = TempDir::new().unwrap();
        let kb = kb(&dir);
        let first = kb
            .add_document("tech", "d1", "v1", Value::Null)
            .unwrap();
        let second = kb
            .add_document("tech", "d1", "v2", Value::Null)
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(kb.get("tech", "d1").unwrap().content, "v2");
    }

    #[test]
    fn search_ranks_by_score_then_namespace_then_id() {
        let dir = TempDir::new().unwrap();
        let kb = kb(&dir);
        kb.add_document("news", "b", "rust", Value::Null).unwrap();
        kb.add_document("tech", "a", "rust", Value::Null).unwrap();
        kb.add_document("tech", "c", "rust rust", Value::Null).unwrap();

        let hits = kb.search("rust", None, 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.memory_id.as_str()).collect();
        assert_eq!(ids, vec!["tech/c", "news/b", "tech/a"]);

        // Determinism: the same query returns the same order.
        let again = kb.search("rust", None, 10).unwrap();
        let ids2: Vec<&str> = again.iter().map(|h| h.memory_id.as_str()).collect();
        assert_eq!(ids, ids2);
    }

    #[test]
    fn search_scopes_to_namespace_and_limit() {
        let dir = TempDir::new().unwrap();
        let kb = kb(&dir);
        kb.add_document("news", "n1", "rust news", Value::Null).unwrap();
        kb.add_document("tech", "t1", "rust tech", Value::Null).unwrap();

        let hits = kb.search("rust", Some("tech"), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_id, "tech/t1");

        let capped = kb.search("rust", None, 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn persists_across_reload() {
        let dir = TempDir::new().unwrap();
        {
            let kb = kb(&dir);
            kb.add_document("tech", "d1", "durable", Value::Null).unwrap();
        }
        let reloaded = kb(&dir);
        assert_eq!(reloaded.get("tech", "d1").unwrap().content, "durable");
    }

    #[test]
    fn bulk_add_counts() {
        let dir = TempDir::new().unwrap();
        let kb = kb(&dir);
        let added = kb
            .bulk_add(
                "news",
                vec![
                    ("a".into(), "one".into(), Value::Null),
                    ("b".into(), "two".into(), Value::Null),
                ],
            )
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(kb.stats().namespaces["news"], 2);
    }

    #[test]
    fn delete_by_doc_id_scans_namespaces() {
        let dir = TempDir::new().unwrap();
        let kb = kb(&dir);
        kb.add_document("news", "shared", "x", Value::Null).unwrap();
        assert!(kb.delete_by_doc_id("shared").unwrap());
        assert!(!kb.delete_by_doc_id("shared").unwrap());
    }
}
