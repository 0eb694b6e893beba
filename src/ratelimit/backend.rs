//! Counter store trait shared by the local and remote backends.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Remaining lifetime of a counter, using the same three cases Redis `PTTL`
/// distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The counter expires after this duration.
    Live(Duration),
    /// The counter exists but no expiry has been set on it.
    NoExpiry,
    /// The counter does not exist or its window has already elapsed.
    Gone,
}

impl Ttl {
    /// Interpret a Redis `PTTL` reply.
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -1 => Ttl::NoExpiry,
            ms if ms > 0 => Ttl::Live(Duration::from_millis(ms as u64)),
            _ => Ttl::Gone,
        }
    }
}

/// Outcome of a single increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Count after the increment
    pub count: u64,
    /// Remaining window for the key at the time of the increment
    pub ttl: Ttl,
}

/// Errors raised by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the command
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// A command did not complete within its deadline
    #[error("Counter store command timed out after {0:?}")]
    Timeout(Duration),

    /// The window cannot be represented as an absolute expiry
    #[error("Window {0:?} is out of range")]
    WindowOutOfRange(Duration),

    /// Redis client errors
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),
}

/// Key/value counter backend with expiry semantics.
///
/// Implementations must linearize increments per key. Nothing is promised
/// across keys.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, creating it if needed.
    ///
    /// A counter whose window has elapsed starts over at 1. Stores that can
    /// arm the expiry in the same step do so with `window`; the others leave
    /// the counter at [`Ttl::NoExpiry`] for a later [`set_expiry`](Self::set_expiry).
    async fn increment(&self, key: &str, window: Duration) -> Result<Hit, StoreError>;

    /// Arm the expiry of `key` to `window` from now.
    ///
    /// Only meaningful right after the increment that created the counter,
    /// when that increment left it unarmed. Setting an expiry on a missing key is a no-op.
    async fn set_expiry(&self, key: &str, window: Duration) -> Result<(), StoreError>;

    /// Remaining window for `key` without touching its count.
    async fn time_remaining(&self, key: &str) -> Result<Ttl, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_from_pttl() {
        assert_eq!(Ttl::from_pttl(-2), Ttl::Gone);
        assert_eq!(Ttl::from_pttl(-1), Ttl::NoExpiry);
        assert_eq!(Ttl::from_pttl(0), Ttl::Gone);
        assert_eq!(
            Ttl::from_pttl(1_500),
            Ttl::Live(Duration::from_millis(1_500))
        );
    }
}
