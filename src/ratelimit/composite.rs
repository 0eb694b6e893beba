//! Address + identity rate limiting with a single cooldown.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::backend::CounterStore;
use super::counter::{Decision, Dimension};
use super::limiter::WindowRateLimiter;
use super::memory::MemoryCounterStore;
use super::redis::RedisCounterStore;
use crate::clock::Clock;
use crate::config::{BackendKind, VerigateConfig};
use crate::error::Result;

/// Cooldown imposed when a counter store cannot be consulted.
pub const DEFAULT_STORE_ERROR_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Combines a per-address and a per-identity limiter into one decision.
///
/// Both counters advance on every call, whatever the outcome, so tripping
/// one dimension never spares the other.
#[derive(Clone)]
pub struct CompositeRateLimiter {
    ip: WindowRateLimiter,
    email: WindowRateLimiter,
    store_error_cooldown: Duration,
}

impl CompositeRateLimiter {
    /// Create a composite limiter from the two dimension limiters.
    pub fn new(ip: WindowRateLimiter, email: WindowRateLimiter) -> Self {
        Self {
            ip,
            email,
            store_error_cooldown: DEFAULT_STORE_ERROR_COOLDOWN,
        }
    }

    /// Override the cooldown used when a store errors.
    pub fn with_store_error_cooldown(mut self, cooldown: Duration) -> Self {
        self.store_error_cooldown = cooldown;
        self
    }

    /// Build the limiter described by `config`, connecting to Redis if needed.
    pub async fn from_config(config: &VerigateConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let rate_limiting = &config.rate_limiting;

        let store: Arc<dyn CounterStore> = match rate_limiting.backend {
            BackendKind::Memory => Arc::new(MemoryCounterStore::new(clock)),
            backend @ (BackendKind::Redis | BackendKind::RedisSentinel) => {
                Arc::new(RedisCounterStore::connect(&config.redis, backend).await?)
            }
        };

        let ip = WindowRateLimiter::new(Arc::clone(&store), rate_limiting.ip.policy()?);
        let email = WindowRateLimiter::new(store, rate_limiting.email.policy()?);

        Ok(Self::new(ip, email).with_store_error_cooldown(rate_limiting.store_error_cooldown()))
    }

    /// Decide whether `address` may trigger another send to `identity`.
    ///
    /// Never fails: a store error denies for the conservative cooldown.
    #[instrument(skip_all, fields(address = %address))]
    pub async fn allow(&self, address: &str, identity: &str) -> Decision {
        let ip_key = Dimension::Ip.key(address);
        let email_key = Dimension::Email.key(identity);

        let (ip, email) = tokio::join!(self.ip.allow(&ip_key), self.email.allow(&email_key));

        let (ip, email) = match (ip, email) {
            (Ok(ip), Ok(email)) => (ip, email),
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    error = %e,
                    cooldown = ?self.store_error_cooldown,
                    "Counter store failed, denying request"
                );
                return Decision::deny(self.store_error_cooldown);
            }
        };

        if ip.allowed && email.allowed {
            return Decision::allow();
        }

        let retry_after = ip.retry_after.max(email.retry_after);
        debug!(
            ip_allowed = ip.allowed,
            email_allowed = email.allowed,
            retry_after = ?retry_after,
            "Request throttled"
        );
        Decision::deny(retry_after)
    }

    /// Current cooldown for the pair without counting a hit.
    ///
    /// Fails closed like [`allow`](Self::allow).
    pub async fn cooldown(&self, address: &str, identity: &str) -> Duration {
        let ip_key = Dimension::Ip.key(address);
        let email_key = Dimension::Email.key(identity);

        let (ip, email) = tokio::join!(
            self.ip.time_remaining(&ip_key),
            self.email.time_remaining(&email_key)
        );

        match (ip, email) {
            (Ok(ip), Ok(email)) => ip.max(email),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Counter store failed while reading cooldown");
                self.store_error_cooldown
            }
        }
    }
}
