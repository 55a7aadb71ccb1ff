//! Client-local, reference-counted per-path mutual exclusion.
//!
//! This coordinates local callers only (for example the watcher and the
//! inbound update loop racing on the same path); the remote lock is a
//! separate concern handled by the RPC protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One live local session per path; dropped from the registry when the
/// last holder releases it.
#[derive(Default)]
pub struct ClientFileSession {
    refs: AtomicUsize,
    pub mu: tokio::sync::Mutex<()>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ClientFileSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (creating if absent) the session for `path` and take a
    /// reference on it. Pair every call with `release`.
    pub fn acquire(&self, path: &str) -> Arc<ClientFileSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.entry(path.to_string()).or_default().clone();
        session.refs.fetch_add(1, Ordering::SeqCst);
        session
    }

    /// Drop one reference; the session is garbage-collected when the
    /// count reaches zero.
    pub fn release(&self, path: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get(path) {
            if session.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
                sessions.remove(path);
            }
        }
    }

    pub fn active_paths(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_gc() {
        let registry = SessionRegistry::new();

        let first = registry.acquire("a.txt");
        let second = registry.acquire("a.txt");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.active_paths(), 1);

        registry.release("a.txt");
        assert_eq!(registry.active_paths(), 1, "still one holder");

        registry.release("a.txt");
        assert_eq!(registry.active_paths(), 0, "gc at zero refs");

        // A fresh acquire creates a new session.
        let third = registry.acquire("a.txt");
        assert!(!Arc::ptr_eq(&first, &third));
        registry.release("a.txt");
    }

    #[tokio::test]
    async fn sessions_serialize_local_callers() {
        let registry = Arc::new(SessionRegistry::new());

        let session = registry.acquire("b.txt");
        let held = session.mu.lock().await;

        let other = registry.acquire("b.txt");
        assert!(other.mu.try_lock().is_err(), "same path contends");

        drop(held);
        assert!(other.mu.try_lock().is_ok());

        registry.release("b.txt");
        registry.release("b.txt");
    }
}
