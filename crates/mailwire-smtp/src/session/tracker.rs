//! Registry of live sessions, for graceful shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::SessionHandle;

#[derive(Debug, Default)]
struct Inner {
    sessions: Mutex<HashMap<u64, SessionHandle>>,
    next_id: AtomicU64,
    drained: Notify,
}

impl Inner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tracks the sessions of a server or client pool.
///
/// Safe to use from many tasks at once. Each registered session holds a
/// [`SessionGuard`]; dropping the guard unregisters it.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    inner: Arc<Inner>,
}

impl SessionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session and returns its handle plus the guard that
    /// keeps it registered.
    #[must_use]
    pub fn register(&self) -> (SessionHandle, SessionGuard) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SessionHandle::new();
        self.inner.sessions().insert(id, handle.clone());
        tracing::trace!(id, "session registered");
        (
            handle,
            SessionGuard {
                id,
                inner: Arc::clone(&self.inner),
            },
        )
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.sessions().len()
    }

    /// Asks every registered session to terminate.
    pub fn terminate_all(&self) {
        let handles: Vec<SessionHandle> = self.inner.sessions().values().cloned().collect();
        tracing::info!(count = handles.len(), "terminating sessions");
        for handle in handles {
            handle.terminate();
        }
    }

    /// Waits until no session is registered.
    pub async fn drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Terminates every session and waits for all of them to close.
    pub async fn shutdown(&self) {
        self.terminate_all();
        self.drained().await;
    }
}

/// Keeps a session registered with its [`SessionTracker`].
#[derive(Debug)]
pub struct SessionGuard {
    id: u64,
    inner: Arc<Inner>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let empty = {
            let mut sessions = self.inner.sessions();
            sessions.remove(&self.id);
            sessions.is_empty()
        };
        tracing::trace!(id = self.id, "session unregistered");
        if empty {
            self.inner.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn register_and_drop() {
        let tracker = SessionTracker::new();
        let (_h1, g1) = tracker.register();
        let (_h2, g2) = tracker.register();
        assert_eq!(tracker.active(), 2);
        drop(g1);
        assert_eq!(tracker.active(), 1);
        drop(g2);
        assert_eq!(tracker.active(), 0);
    }

    #[test]
    fn terminate_all_reaches_every_handle() {
        let tracker = SessionTracker::new();
        let (h1, _g1) = tracker.register();
        let (h2, _g2) = tracker.register();
        tracker.terminate_all();
        assert!(h1.is_terminated());
        assert!(h2.is_terminated());
    }

    #[tokio::test]
    async fn drained_returns_immediately_when_empty() {
        SessionTracker::new().drained().await;
    }

    #[tokio::test]
    async fn shutdown_waits_for_guards() {
        let tracker = SessionTracker::new();
        let (handle, guard) = tracker.register();

        let task = tokio::spawn(async move {
            while !handle.is_terminated() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            drop(guard);
        });

        tokio::time::timeout(Duration::from_secs(5), tracker.shutdown())
            .await
            .unwrap();
        assert_eq!(tracker.active(), 0);
        task.await.unwrap();
    }
}
