//! Per-session concurrency control.
//!
//! Each internal session id maps to a `Semaphore(1)`; holding the permit
//! means holding the session's mutation lock. Waiters queue in arrival
//! order (tokio semaphores are FIFO-fair), and distinct sessions proceed
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use choir_domain::error::{Error, Result};

pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the mutation lock for a session, waiting in FIFO order
    /// behind any in-flight turn. The permit releases on drop.
    pub async fn acquire(&self, internal_id: &str) -> Result<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(internal_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .map_err(|_| Error::Internal("session lock closed".into()))
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries for sessions with no holder and no waiters.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sequential_access() {
        let map = SessionLockMap::new();
        let permit1 = map.acquire("s1").await.unwrap();
        drop(permit1);
        let permit2 = map.acquire("s1").await.unwrap();
        drop(permit2);
    }

    #[tokio::test]
    async fn distinct_sessions_run_in_parallel() {
        let map = SessionLockMap::new();
        let p1 = map.acquire("s1").await.unwrap();
        let p2 = map.acquire("s2").await.unwrap();
        assert_eq!(map.session_count(), 2);
        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn same_session_queues() {
        let map = Arc::new(SessionLockMap::new());
        let p1 = map.acquire("s1").await.unwrap();

        let map2 = map.clone();
        let waiter = tokio::spawn(async move {
            let _p2 = map2.acquire("s1").await.unwrap();
            42
        });

        // Give the waiter a moment to queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(p1);
        assert_eq!(waiter.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() {
        let map = Arc::new(SessionLockMap::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = map.acquire("s1").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..3 {
            let map = map.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _p = map.acquire("s1").await.unwrap();
                order.lock().push(i);
            }));
            // Stagger arrivals so the queue order is deterministic.
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn prune_removes_only_idle_locks() {
        let map = SessionLockMap::new();
        let held = map.acquire("busy").await.unwrap();
        drop(map.acquire("idle").await.unwrap());

        map.prune_idle();
        assert_eq!(map.session_count(), 1);
        drop(held);
        map.prune_idle();
        assert_eq!(map.session_count(), 0);
    }
}
