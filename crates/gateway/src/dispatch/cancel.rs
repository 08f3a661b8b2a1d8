//! Per-session cancellation tokens.
//!
//! Each externally originated task registers a token under its internal
//! session id. On cancel: the in-flight provider attempt is abandoned once
//! it returns, further retries are skipped, and streaming fragment
//! production stops within one fragment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation flag checked at suspension points.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Active cancellation tokens keyed by internal session id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a session.
    pub fn register(&self, internal_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(internal_id.to_owned(), token.clone());
        token
    }

    /// Cancel a session's running task. Returns whether a token existed.
    pub fn cancel(&self, internal_id: &str) -> bool {
        match self.tokens.lock().get(internal_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token once the task completes.
    pub fn remove(&self, internal_id: &str) {
        self.tokens.lock().remove(internal_id);
    }

    pub fn is_running(&self, internal_id: &str) -> bool {
        self.tokens.lock().contains_key(internal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn map_register_cancel_remove() {
        let map = CancelMap::new();
        let token = map.register("s1");
        assert!(map.is_running("s1"));

        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());

        map.remove("s1");
        assert!(!map.is_running("s1"));
        assert!(!map.cancel("s1"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old = map.register("s1");
        let new = map.register("s1");
        map.cancel("s1");
        assert!(new.is_cancelled());
        assert!(!old.is_cancelled());
    }
}
