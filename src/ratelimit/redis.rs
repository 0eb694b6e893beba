//! Redis-backed counter store.
//!
//! Counters live in Redis under `{namespace}:{key}` and expire through
//! native key TTLs, so the remote side bounds its own memory. The store is
//! reachable either directly or through Redis Sentinel. Lost connections
//! are re-established with exponential backoff, so a restart or a Sentinel
//! failover only fails the commands issued while the link is down.
//!
//! ## Operational caveat
//!
//! Opening a window takes two commands: `INCR` (which creates the key
//! without a TTL) and a later `PEXPIRE`. They are not atomic. If the process
//! dies or the connection drops between them, the key is left without an
//! expiry and keeps counting until someone deletes it. Such keys are
//! reported with a warning by the limiter every time they deny a request.

use async_trait::async_trait;
use fred::clients::Client;
use fred::error::{Error as FredError, ErrorKind};
use fred::interfaces::{ClientLike, KeysInterface};
use fred::types::config::{Config, ReconnectPolicy, ServerConfig};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use super::backend::{CounterStore, Hit, StoreError, Ttl};
use crate::config::{BackendKind, RedisConfig};
use crate::error::{Result, VerigateError};

/// Counter store using Redis atomic increments.
pub struct RedisCounterStore {
    client: Client,
    namespace: String,
    command_timeout: Duration,
}

impl RedisCounterStore {
    /// Wrap an already connected client.
    pub fn new(client: Client, namespace: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            command_timeout,
        }
    }

    /// Connect using `config`, directly or through Sentinel depending on `backend`.
    pub async fn connect(config: &RedisConfig, backend: BackendKind) -> Result<Self> {
        let server = match backend {
            BackendKind::RedisSentinel => {
                let hosts = config
                    .sentinel
                    .hosts
                    .iter()
                    .map(|host| parse_host(host))
                    .collect::<Result<Vec<_>>>()?;
                if hosts.is_empty() {
                    return Err(VerigateError::Config(
                        "redis_sentinel backend needs at least one sentinel host".to_string(),
                    ));
                }
                ServerConfig::new_sentinel(hosts, config.sentinel.master_name.clone())
            }
            _ => ServerConfig::new_centralized(config.host.clone(), config.port),
        };

        let client_config = Config {
            server,
            username: config.username.clone(),
            password: config.password.clone(),
            ..Default::default()
        };

        let reconnect = ReconnectPolicy::new_exponential(
            config.reconnect_max_attempts,
            config.reconnect_min_delay_ms,
            config.reconnect_max_delay_ms,
            2,
        );

        let client = Client::new(client_config, None, None, Some(reconnect));
        client.connect();

        let timeout = config.command_timeout();
        tokio::time::timeout(timeout * 10, client.wait_for_connect())
            .await
            .map_err(|_| StoreError::Timeout(timeout * 10))?
            .map_err(classify)?;

        info!(
            backend = ?backend,
            namespace = %config.namespace,
            max_reconnect_delay_ms = config.reconnect_max_delay_ms,
            "Connected to Redis counter store"
        );

        Ok(Self::new(client, config.namespace.clone(), timeout))
    }

    fn key(&self, key: &str) -> String {
        namespaced_key(&self.namespace, key)
    }

    /// Run a command under the configured deadline.
    async fn bounded<T, F>(&self, command: &'static str, fut: F) -> std::result::Result<T, StoreError>
    where
        F: Future<Output = std::result::Result<T, FredError>> + Send,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(command, error = %e, "Redis command failed");
                Err(classify(e))
            }
            Err(_) => {
                warn!(command, timeout = ?self.command_timeout, "Redis command timed out");
                Err(StoreError::Timeout(self.command_timeout))
            }
        }
    }
}

/// Redis key for a counter key, e.g. `verigate:ip:1.2.3.4`.
fn namespaced_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

/// Connection-level failures become [`StoreError::Unavailable`]; everything
/// else is a command error.
fn classify(e: FredError) -> StoreError {
    match e.kind() {
        ErrorKind::IO | ErrorKind::Canceled => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Redis(e),
    }
}

/// Parse a `host:port` sentinel address.
fn parse_host(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| VerigateError::Config(format!("sentinel host '{addr}' is missing a port")))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| VerigateError::Config(format!("sentinel host '{addr}': {e}")))?;
    Ok((host.to_string(), port))
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    /// `INCR` leaves a new key without a TTL; the limiter arms it with
    /// [`set_expiry`](CounterStore::set_expiry), so `window` is unused here.
    async fn increment(&self, key: &str, _window: Duration) -> std::result::Result<Hit, StoreError> {
        let key = self.key(key);

        let (count, pttl): (i64, i64) = self
            .bounded("INCR", async {
                let pipeline = self.client.pipeline();
                let _: () = pipeline.incr(key.as_str()).await?;
                let _: () = pipeline.pttl(key.as_str()).await?;
                pipeline.all().await
            })
            .await?;

        Ok(Hit {
            count: count.max(0) as u64,
            ttl: Ttl::from_pttl(pttl),
        })
    }

    async fn set_expiry(&self, key: &str, window: Duration) -> std::result::Result<(), StoreError> {
        let key = self.key(key);
        let millis = i64::try_from(window.as_millis())
            .map_err(|_| StoreError::WindowOutOfRange(window))?;

        let _: i64 = self
            .bounded("PEXPIRE", self.client.pexpire(key.as_str(), millis, None))
            .await?;
        Ok(())
    }

    async fn time_remaining(&self, key: &str) -> std::result::Result<Ttl, StoreError> {
        let key = self.key(key);
        let pttl: i64 = self.bounded("PTTL", self.client.pttl(key.as_str())).await?;
        Ok(Ttl::from_pttl(pttl))
    }
}
