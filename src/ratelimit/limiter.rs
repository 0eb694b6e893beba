//! Fixed-window rate limiter over a single counter store.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::backend::{CounterStore, StoreError, Ttl};
use super::counter::{Decision, Policy};

/// Applies one fixed-window [`Policy`] to keys held in a [`CounterStore`].
///
/// The limiter holds no counter state of its own and can be shared freely.
/// A window opens on the first hit for a key, never slides, and empties
/// entirely when it closes.
#[derive(Clone)]
pub struct WindowRateLimiter {
    store: Arc<dyn CounterStore>,
    policy: Policy,
}

impl WindowRateLimiter {
    /// Create a limiter applying `policy` to counters in `store`.
    pub fn new(store: Arc<dyn CounterStore>, policy: Policy) -> Self {
        Self { store, policy }
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Count a hit for `key` and decide whether it is allowed.
    pub async fn allow(&self, key: &str) -> Result<Decision, StoreError> {
        let hit = self.store.increment(key, self.policy.window()).await?;
        let limit = u64::from(self.policy.limit());

        trace!(
            key = %key,
            count = hit.count,
            limit = limit,
            "Checking rate limit"
        );

        if hit.count == 1 {
            if hit.ttl == Ttl::NoExpiry {
                self.store.set_expiry(key, self.policy.window()).await?;
            }
            debug!(key = %key, window = ?self.policy.window(), "Opened rate limit window");
            return Ok(Decision::allow());
        }

        if hit.count <= limit {
            return Ok(Decision::allow());
        }

        match hit.ttl {
            Ttl::Live(remaining) => {
                debug!(
                    key = %key,
                    count = hit.count,
                    retry_after = ?remaining,
                    "Rate limit exceeded"
                );
                Ok(Decision::deny(remaining))
            }
            Ttl::Gone => {
                // Elapsed but not yet reset: behave as a fresh window.
                debug!(key = %key, "Window elapsed before reset, re-arming");
                self.store.set_expiry(key, self.policy.window()).await?;
                Ok(Decision::allow())
            }
            Ttl::NoExpiry => {
                warn!(
                    key = %key,
                    count = hit.count,
                    "Counter has no expiry and will not reset on its own"
                );
                Ok(Decision::deny(self.policy.window()))
            }
        }
    }

    /// Remaining cooldown for `key` without counting a hit.
    ///
    /// Zero when the key has no window. A counter that lost its expiry
    /// reports a full window, the same cooldown [`allow`](Self::allow)
    /// answers with once it is over the limit.
    pub async fn time_remaining(&self, key: &str) -> Result<Duration, StoreError> {
        match self.store.time_remaining(key).await? {
            Ttl::Live(remaining) => Ok(remaining),
            Ttl::NoExpiry => Ok(self.policy.window()),
            Ttl::Gone => Ok(Duration::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::ratelimit::backend::Hit;
    use crate::ratelimit::memory::MemoryCounterStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    const WINDOW: Duration = Duration::from_secs(30 * 60);

    fn limiter(limit: u32) -> (WindowRateLimiter, Arc<MemoryCounterStore>, MockClock) {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap());
        let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
        let limiter = WindowRateLimiter::new(store.clone(), Policy::new(limit, WINDOW).unwrap());
        (limiter, store, clock)
    }

    /// Store that replays scripted hits, for states the memory store never produces.
    struct ScriptedStore {
        hits: Mutex<Vec<Hit>>,
        armed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CounterStore for ScriptedStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<Hit, StoreError> {
            Ok(self.hits.lock().remove(0))
        }

        async fn set_expiry(&self, key: &str, _window: Duration) -> Result<(), StoreError> {
            self.armed.lock().push(key.to_string());
            Ok(())
        }

        async fn time_remaining(&self, _key: &str) -> Result<Ttl, StoreError> {
            Ok(Ttl::NoExpiry)
        }
    }

    #[tokio::test]
    async fn test_limit_then_deny() {
        let (limiter, _store, _clock) = limiter(5);

        for i in 1..=5 {
            let decision = limiter.allow("email:test@email.com").await.unwrap();
            assert!(decision.allowed, "call {i} should be allowed");
            assert_eq!(decision.retry_after, Duration::ZERO);
        }

        let decision = limiter.allow("email:test@email.com").await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after > Duration::ZERO);
        assert_eq!(decision.retry_after, WINDOW);
    }

    #[tokio::test]
    async fn test_retry_after_counts_down_to_window_end() {
        let (limiter, _store, clock) = limiter(1);

        limiter.allow("k").await.unwrap();
        clock.advance(Duration::from_secs(10 * 60));

        let decision = limiter.allow("k").await.unwrap();
        assert_eq!(decision, Decision::deny(Duration::from_secs(20 * 60)));
    }

    #[tokio::test]
    async fn test_window_resets_after_elapsing() {
        let (limiter, store, clock) = limiter(5);

        for _ in 0..6 {
            limiter.allow("k").await.unwrap();
        }
        assert!(!limiter.allow("k").await.unwrap().allowed);

        clock.advance(WINDOW + Duration::from_secs(1));

        let decision = limiter.allow("k").await.unwrap();
        assert_eq!(decision, Decision::allow());
        assert_eq!(store.entry("k").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_window_resets_even_when_under_limit() {
        let (limiter, store, clock) = limiter(5);

        for _ in 0..3 {
            limiter.allow("k").await.unwrap();
        }
        clock.advance(WINDOW);

        assert!(limiter.allow("k").await.unwrap().allowed);
        assert_eq!(store.entry("k").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_over_limit_hits_do_not_extend_window() {
        let (limiter, store, clock) = limiter(2);
        let start = clock.now();

        for _ in 0..2 {
            limiter.allow("k").await.unwrap();
        }
        for _ in 0..10 {
            clock.advance(Duration::from_secs(60));
            assert!(!limiter.allow("k").await.unwrap().allowed);
        }

        let expiry = store.entry("k").unwrap().expiry.unwrap();
        assert_eq!(expiry, start + chrono::Duration::minutes(30));
        assert_eq!(
            limiter.time_remaining("k").await.unwrap(),
            Duration::from_secs(20 * 60)
        );
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (limiter, _store, _clock) = limiter(1);

        assert!(limiter.allow("ip:1.1.1.1").await.unwrap().allowed);
        assert!(!limiter.allow("ip:1.1.1.1").await.unwrap().allowed);
        assert!(limiter.allow("ip:2.2.2.2").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_elapsed_window_over_limit_is_treated_as_fresh() {
        let store = Arc::new(ScriptedStore {
            hits: Mutex::new(vec![Hit { count: 9, ttl: Ttl::Gone }]),
            armed: Mutex::new(Vec::new()),
        });
        let limiter = WindowRateLimiter::new(store.clone(), Policy::new(3, WINDOW).unwrap());

        assert_eq!(limiter.allow("k").await.unwrap(), Decision::allow());
        assert_eq!(*store.armed.lock(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_counter_without_expiry_stays_denied() {
        let store = Arc::new(ScriptedStore {
            hits: Mutex::new(vec![Hit { count: 4, ttl: Ttl::NoExpiry }]),
            armed: Mutex::new(Vec::new()),
        });
        let limiter = WindowRateLimiter::new(store.clone(), Policy::new(3, WINDOW).unwrap());

        assert_eq!(limiter.allow("k").await.unwrap(), Decision::deny(WINDOW));
        assert!(store.armed.lock().is_empty());
        assert_eq!(limiter.time_remaining("k").await.unwrap(), WINDOW);
    }

    #[tokio::test]
    async fn test_unarmed_first_hit_is_armed() {
        let store = Arc::new(ScriptedStore {
            hits: Mutex::new(vec![Hit { count: 1, ttl: Ttl::NoExpiry }]),
            armed: Mutex::new(Vec::new()),
        });
        let limiter = WindowRateLimiter::new(store.clone(), Policy::new(3, WINDOW).unwrap());

        assert_eq!(limiter.allow("k").await.unwrap(), Decision::allow());
        assert_eq!(*store.armed.lock(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_armed_first_hit_is_not_rearmed() {
        let store = Arc::new(ScriptedStore {
            hits: Mutex::new(vec![Hit { count: 1, ttl: Ttl::Live(WINDOW) }]),
            armed: Mutex::new(Vec::new()),
        });
        let limiter = WindowRateLimiter::new(store.clone(), Policy::new(3, WINDOW).unwrap());

        assert_eq!(limiter.allow("k").await.unwrap(), Decision::allow());
        assert!(store.armed.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_hits_deny_with_live_window() {
        let (limiter, store, clock) = limiter(1);
        let start = clock.now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow("email:fresh@example.com").await.unwrap() })
            })
            .collect();

        let mut decisions = Vec::new();
        for handle in handles {
            decisions.push(handle.await.unwrap());
        }

        assert_eq!(decisions.iter().filter(|d| d.allowed).count(), 1);
        assert!(decisions
            .iter()
            .filter(|d| !d.allowed)
            .all(|d| d.retry_after == WINDOW));
        assert_eq!(
            store.entry("email:fresh@example.com").unwrap().expiry,
            Some(start + chrono::Duration::minutes(30))
        );
    }
}
