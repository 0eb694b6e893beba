//! Process-local counter store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::backend::{CounterStore, Hit, StoreError, Ttl};
use crate::clock::Clock;

/// A counter and the instant its window closes.
///
/// `expiry` is `None` only for entries that were never armed, which the
/// store itself does not produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterEntry {
    pub count: u64,
    pub expiry: Option<DateTime<Utc>>,
}

impl CounterEntry {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| now >= expiry)
    }

    fn ttl(&self, now: DateTime<Utc>) -> Ttl {
        match self.expiry {
            None => Ttl::NoExpiry,
            Some(expiry) => match (expiry - now).to_std() {
                Ok(remaining) if !remaining.is_zero() => Ttl::Live(remaining),
                _ => Ttl::Gone,
            },
        }
    }
}

/// Counter store backed by a single mutex-guarded map.
///
/// A new or stale entry is reset and armed with a fresh window inside the
/// increment that discovers it, so no caller ever observes an unarmed
/// counter. Nothing ever removes a key, so the map grows with the number of
/// distinct keys seen.
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Snapshot of the entry for `key`, if any.
    pub fn entry(&self, key: &str) -> Option<CounterEntry> {
        self.entries.lock().get(key).copied()
    }

    /// Number of keys tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no key has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Hit, StoreError> {
        let now = self.clock.now();
        let fresh_expiry = window_end(now, window)?;

        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_default();

        if entry.expiry.is_none() || entry.is_stale(now) {
            if entry.count > 0 {
                trace!(key = %key, count = entry.count, "Resetting elapsed window");
            }
            *entry = CounterEntry {
                count: 0,
                expiry: Some(fresh_expiry),
            };
        }

        entry.count += 1;
        Ok(Hit {
            count: entry.count,
            ttl: entry.ttl(now),
        })
    }

    async fn set_expiry(&self, key: &str, window: Duration) -> Result<(), StoreError> {
        let expiry = window_end(self.clock.now(), window)?;

        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.expiry = Some(expiry);
        }
        Ok(())
    }

    async fn time_remaining(&self, key: &str) -> Result<Ttl, StoreError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .map_or(Ttl::Gone, |entry| entry.ttl(now)))
    }
}

/// Absolute end of a window opening at `now`.
fn window_end(now: DateTime<Utc>, window: Duration) -> Result<DateTime<Utc>, StoreError> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_add_signed(window))
        .ok_or(StoreError::WindowOutOfRange(window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::TimeZone;

    const WINDOW: Duration = Duration::from_secs(60);

    fn store() -> (MemoryCounterStore, MockClock) {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
        (MemoryCounterStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_increment_arms_new_entry() {
        let (store, clock) = store();
        assert!(store.is_empty());

        let hit = store.increment("ip:1.2.3.4", WINDOW).await.unwrap();
        assert_eq!(hit, Hit { count: 1, ttl: Ttl::Live(WINDOW) });
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.entry("ip:1.2.3.4").unwrap().expiry,
            Some(clock.now() + chrono::Duration::seconds(60))
        );
    }

    #[tokio::test]
    async fn test_increment_counts_within_window() {
        let (store, clock) = store();

        store.increment("k", WINDOW).await.unwrap();

        clock.advance(Duration::from_secs(20));
        let hit = store.increment("k", WINDOW).await.unwrap();
        assert_eq!(hit.count, 2);
        assert_eq!(hit.ttl, Ttl::Live(Duration::from_secs(40)));
    }

    #[tokio::test]
    async fn test_stale_entry_resets_to_one_with_fresh_window() {
        let (store, clock) = store();

        for _ in 0..4 {
            store.increment("k", WINDOW).await.unwrap();
        }

        clock.advance(WINDOW);
        assert_eq!(store.time_remaining("k").await.unwrap(), Ttl::Gone);

        let hit = store.increment("k", WINDOW).await.unwrap();
        assert_eq!(hit, Hit { count: 1, ttl: Ttl::Live(WINDOW) });
        assert_eq!(
            store.entry("k").unwrap().expiry,
            Some(clock.now() + chrono::Duration::seconds(60))
        );
    }

    #[tokio::test]
    async fn test_unrepresentable_window_is_rejected_before_counting() {
        let (store, _clock) = store();

        let result = store.increment("k", Duration::from_secs(u64::MAX)).await;
        assert!(matches!(result, Err(StoreError::WindowOutOfRange(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_expiry_rearms_existing_entry() {
        let (store, clock) = store();

        store.increment("k", WINDOW).await.unwrap();
        clock.advance(Duration::from_secs(30));
        store.set_expiry("k", WINDOW).await.unwrap();

        assert_eq!(store.time_remaining("k").await.unwrap(), Ttl::Live(WINDOW));
    }

    #[tokio::test]
    async fn test_set_expiry_on_missing_key_is_noop() {
        let (store, _clock) = store();
        store.set_expiry("missing", Duration::from_secs(5)).await.unwrap();

        assert!(store.entry("missing").is_none());
        assert_eq!(store.time_remaining("missing").await.unwrap(), Ttl::Gone);
    }

    #[tokio::test]
    async fn test_keys_are_never_evicted() {
        let (store, clock) = store();

        for i in 0..100 {
            let key = format!("email:user{i}@example.com");
            store.increment(&key, Duration::from_secs(1)).await.unwrap();
        }
        clock.advance(Duration::from_secs(3600));

        assert_eq!(store.len(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_serialized_and_armed() {
        let (store, _clock) = store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut hits = Vec::with_capacity(50);
                    for _ in 0..50 {
                        hits.push(store.increment("shared", WINDOW).await.unwrap());
                    }
                    hits
                })
            })
            .collect();

        let mut hits = Vec::new();
        for handle in handles {
            hits.extend(handle.await.unwrap());
        }

        assert_eq!(store.entry("shared").unwrap().count, 400);
        assert!(hits.iter().all(|hit| hit.ttl == Ttl::Live(WINDOW)));
    }
}
