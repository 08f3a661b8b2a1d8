//! Client-to-internal session id translation.
//!
//! The map `(user_id, external_id) → user_<user_id>_<external_id>` is the
//! sole authority for internal ids: they are minted here and nowhere else.
//! Minting is idempotent, and distinct `(user, external)` pairs can never
//! collide because both components are embedded in the internal id.

use std::collections::HashMap;

use parking_lot::RwLock;

use choir_domain::trace::TraceEvent;

pub struct SessionMap {
    /// user_id → (external_id → internal_id)
    sessions: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Look up or mint the internal id for `(user_id, external_id)`.
    pub fn resolve(&self, user_id: &str, external_id: &str) -> String {
        {
            let sessions = self.sessions.read();
            if let Some(internal) = sessions.get(user_id).and_then(|m| m.get(external_id)) {
                return internal.clone();
            }
        }

        let mut sessions = self.sessions.write();
        let user_sessions = sessions.entry(user_id.to_owned()).or_default();
        // Re-check under the write lock: another task may have minted it.
        if let Some(internal) = user_sessions.get(external_id) {
            return internal.clone();
        }
        let internal = format!("user_{user_id}_{external_id}");
        user_sessions.insert(external_id.to_owned(), internal.clone());
        TraceEvent::SessionResolved {
            user_id: user_id.to_owned(),
            external_id: external_id.to_owned(),
            internal_id: internal.clone(),
            is_new: true,
        }
        .emit();
        internal
    }

    /// The internal id when it already exists; never mints.
    pub fn lookup(&self, user_id: &str, external_id: &str) -> Option<String> {
        self.sessions
            .read()
            .get(user_id)
            .and_then(|m| m.get(external_id))
            .cloned()
    }

    /// A user's `(external_id, internal_id)` pairs, sorted by external id.
    pub fn sessions_for(&self, user_id: &str) -> Vec<(String, String)> {
        let sessions = self.sessions.read();
        let mut pairs: Vec<(String, String)> = sessions
            .get(user_id)
            .map(|m| m.iter().map(|(e, i)| (e.clone(), i.clone())).collect())
            .unwrap_or_default();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    /// Forget one mapping, returning the internal id it had.
    pub fn remove(&self, user_id: &str, external_id: &str) -> Option<String> {
        self.sessions
            .write()
            .get_mut(user_id)?
            .remove(external_id)
    }

    /// Forget every mapping for a user (account deletion), returning the
    /// internal ids for purging.
    pub fn remove_user(&self, user_id: &str) -> Vec<String> {
        self.sessions
            .write()
            .remove(user_id)
            .map(|m| m.into_values().collect())
            .unwrap_or_default()
    }
}

impl Default for SessionMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_idempotent() {
        let map = SessionMap::new();
        let first = map.resolve("u1", "s1");
        let second = map.resolve("u1", "s1");
        assert_eq!(first, "user_u1_s1");
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_pairs_never_collide() {
        let map = SessionMap::new();
        let a = map.resolve("u1", "shared");
        let b = map.resolve("u2", "shared");
        let c = map.resolve("u1", "other");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn lookup_never_mints() {
        let map = SessionMap::new();
        assert!(map.lookup("u1", "s1").is_none());
        map.resolve("u1", "s1");
        assert_eq!(map.lookup("u1", "s1").unwrap(), "user_u1_s1");
    }

    #[test]
    fn sessions_for_lists_sorted() {
        let map = SessionMap::new();
        map.resolve("u1", "b");
        map.resolve("u1", "a");
        map.resolve("u2", "c");
        let pairs = map.sessions_for("u1");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "a");
        assert_eq!(pairs[1].0, "b");
    }

    #[test]
    fn remove_and_remove_user() {
        let map = SessionMap::new();
        map.resolve("u1", "s1");
        map.resolve("u1", "s2");
        assert_eq!(map.remove("u1", "s1").unwrap(), "user_u1_s1");
        assert!(map.remove("u1", "s1").is_none());

        let internals = map.remove_user("u1");
        assert_eq!(internals, vec!["user_u1_s2".to_string()]);
        assert!(map.sessions_for("u1").is_empty());
    }
}
