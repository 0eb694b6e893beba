//! Fixed-window abuse rate limiting.

mod backend;
mod composite;
mod counter;
mod limiter;
mod memory;
mod redis;

pub use backend::{CounterStore, Hit, StoreError, Ttl};
pub use composite::{CompositeRateLimiter, DEFAULT_STORE_ERROR_COOLDOWN};
pub use counter::{Decision, Dimension, Policy, MAX_WINDOW};
pub use limiter::WindowRateLimiter;
pub use memory::{CounterEntry, MemoryCounterStore};
pub use redis::RedisCounterStore;
