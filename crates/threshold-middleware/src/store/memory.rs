use super::{RateStore, StoreError, WindowCount};
use crate::middleware::BoxFuture;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Expired windows are swept once every this many increments.
const SWEEP_INTERVAL: u64 = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// Process-local fixed-window store.
///
/// Uses the Tokio clock so window expiry follows paused time in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
    ops: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys, live or not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Returns `true` if no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drops every window that has expired.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.windows.retain(|_, window| window.expires_at > now);
    }

    fn increment_now(&self, key: &str, window: Duration) -> WindowCount {
        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep();
        }

        let now = Instant::now();
        // The entry guard holds the shard lock, so read-modify-write is atomic per key.
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now + window,
        });

        if now >= entry.expires_at {
            entry.count = 0;
            entry.expires_at = now + window;
        }
        entry.count += 1;

        WindowCount {
            count: entry.count,
            reset_after: entry.expires_at.saturating_duration_since(now),
        }
    }
}

impl RateStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn increment<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, Result<WindowCount, StoreError>> {
        Box::pin(async move { Ok(self.increment_now(key, window)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(900);

    #[tokio::test(start_paused = true)]
    async fn test_counts_within_window() {
        let store = MemoryStore::new();
        for expected in 1..=3 {
            let state = store.increment("ip:10.0.0.1", WINDOW).await.unwrap();
            assert_eq!(state.count, expected);
        }
        let other = store.increment("ip:10.0.0.2", WINDOW).await.unwrap();
        assert_eq!(other.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resets_exactly_at_window_boundary() {
        let store = MemoryStore::new();
        store.increment("user:1", WINDOW).await.unwrap();

        tokio::time::advance(WINDOW - Duration::from_secs(1)).await;
        let before = store.increment("user:1", WINDOW).await.unwrap();
        assert_eq!(before.count, 2);
        assert_eq!(before.reset_after, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        let after = store.increment("user:1", WINDOW).await.unwrap();
        assert_eq!(after.count, 1);
        assert_eq!(after.reset_after, WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_expired() {
        let store = MemoryStore::new();
        store.increment("a", Duration::from_secs(1)).await.unwrap();
        store.increment("b", WINDOW).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.sweep();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_atomic() {
        let store = Arc::new(MemoryStore::new());
        let mut tasks = Vec::new();
        for _ in 0..200 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.increment("user:hot", WINDOW).await.unwrap().count
            }));
        }

        let mut counts = Vec::new();
        for task in tasks {
            counts.push(task.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=200).collect::<Vec<_>>());
    }
}
