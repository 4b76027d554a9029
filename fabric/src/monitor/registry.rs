//! The process-local `activeMonitors` map (`spec.md` §4.6).
//!
//! Mirrors the `ConnectionManager`'s discipline: a single writer lock
//! guards insert/delete, a read-only lookup backs the idempotency check, and
//! no code outside this module is allowed to touch the map directly.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Result of a `startMonitoring` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// No monitor existed for this stream; one was registered and spawned.
    Started,
    /// A monitor was already active for this stream; nothing changed.
    AlreadyActive,
}

/// Registry of currently-running per-stream monitor tasks.
#[derive(Default)]
pub struct MonitorRegistry {
    active: RwLock<HashMap<String, JoinHandle<()>>>,
}

impl MonitorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `stream_id` if no monitor is already active
    /// for it. Returns [`StartOutcome::AlreadyActive`] without touching the
    /// map if one exists (the caller should abort the handle it already
    /// spawned in that case, since it raced and lost).
    pub async fn try_register(&self, stream_id: &str, handle: JoinHandle<()>) -> StartOutcome {
        let mut guard = self.active.write().await;
        if guard.contains_key(stream_id) {
            handle.abort();
            return StartOutcome::AlreadyActive;
        }
        guard.insert(stream_id.to_string(), handle);
        StartOutcome::Started
    }

    /// Whether a monitor is currently active for `stream_id`.
    pub async fn is_active(&self, stream_id: &str) -> bool {
        self.active.read().await.contains_key(stream_id)
    }

    /// Remove `stream_id`'s entry, called by the task itself right before
    /// its loop exits (§4.6: "termination removes the entry before the loop
    /// goroutine exits"). Idempotent.
    pub async fn remove(&self, stream_id: &str) {
        self.active.write().await.remove(stream_id);
    }

    /// Explicit stop: abort the task and remove its entry. Idempotent; a
    /// no-op if no monitor is active for `stream_id`.
    pub async fn stop(&self, stream_id: &str) {
        if let Some(handle) = self.active.write().await.remove(stream_id) {
            handle.abort();
        }
    }

    /// Count of currently-active monitors, for metrics/shutdown enumeration.
    pub async fn count(&self) -> usize {
        self.active.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_start_for_same_stream_is_rejected() {
        let registry = MonitorRegistry::new();
        let handle_a = tokio::spawn(async { std::future::pending::<()>().await });
        let outcome_a = registry.try_register("s1", handle_a).await;
        assert_eq!(outcome_a, StartOutcome::Started);

        let handle_b = tokio::spawn(async { std::future::pending::<()>().await });
        let outcome_b = registry.try_register("s1", handle_b).await;
        assert_eq!(outcome_b, StartOutcome::AlreadyActive);
        assert_eq!(registry.count().await, 1);

        registry.stop("s1").await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = MonitorRegistry::new();
        registry.remove("never-started").await;
        registry.remove("never-started").await;
        assert_eq!(registry.count().await, 0);
    }
}
