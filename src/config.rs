//! Configuration management for Verigate.
//!
//! Settings come from an optional YAML file layered with environment
//! variables prefixed `VERIGATE__`, e.g. `VERIGATE__TOKEN__SECRET` or
//! `VERIGATE__RATE_LIMITING__BACKEND=redis`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, VerigateError};
use crate::ratelimit::Policy;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerigateConfig {
    /// Token signing configuration
    #[serde(default)]
    pub token: TokenConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Redis connection settings, used by the redis backends
    #[serde(default)]
    pub redis: RedisConfig,
}

/// Token signing configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Shared HMAC secret
    #[serde(default)]
    pub secret: String,

    /// Lifetime of a verification link in seconds
    #[serde(default = "default_link_ttl")]
    pub link_ttl_secs: u64,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("link_ttl_secs", &self.link_ttl_secs)
            .finish()
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            link_ttl_secs: default_link_ttl(),
        }
    }
}

fn default_link_ttl() -> u64 {
    15 * 60
}

/// Counter store selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process-local map
    #[serde(alias = "inmemory")]
    Memory,
    /// Single Redis endpoint
    Redis,
    /// Redis behind Sentinel failover
    RedisSentinel,
}

/// One fixed-window policy as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requests allowed per window
    pub limit: u32,
    /// Window length in seconds
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

impl PolicyConfig {
    /// Validated policy.
    pub fn policy(&self) -> Result<Policy> {
        Policy::new(self.limit, Duration::from_secs(self.window_secs))
    }
}

fn default_window() -> u64 {
    30 * 60
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Where counters are kept
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Per-identity policy
    #[serde(default = "default_email_policy")]
    pub email: PolicyConfig,

    /// Per-address policy
    #[serde(default = "default_ip_policy")]
    pub ip: PolicyConfig,

    /// Cooldown advertised when the counter store fails
    #[serde(default = "default_store_error_cooldown")]
    pub store_error_cooldown_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            email: default_email_policy(),
            ip: default_ip_policy(),
            store_error_cooldown_secs: default_store_error_cooldown(),
        }
    }
}

impl RateLimitingConfig {
    /// Cooldown applied on store errors.
    pub fn store_error_cooldown(&self) -> Duration {
        Duration::from_secs(self.store_error_cooldown_secs)
    }
}

fn default_backend() -> BackendKind {
    BackendKind::Memory
}

fn default_email_policy() -> PolicyConfig {
    PolicyConfig {
        limit: 3,
        window_secs: default_window(),
    }
}

fn default_ip_policy() -> PolicyConfig {
    PolicyConfig {
        limit: 10,
        window_secs: default_window(),
    }
}

fn default_store_error_cooldown() -> u64 {
    30 * 60
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis host for the direct backend
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis port for the direct backend
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// ACL username
    #[serde(default)]
    pub username: Option<String>,

    /// Password
    #[serde(default)]
    pub password: Option<String>,

    /// Prefix for every counter key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Deadline for a single command in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Reconnect attempts after a lost connection, 0 for unlimited
    #[serde(default)]
    pub reconnect_max_attempts: u32,

    /// First reconnect delay in milliseconds
    #[serde(default = "default_reconnect_min_delay")]
    pub reconnect_min_delay_ms: u32,

    /// Ceiling for the exponential reconnect delay in milliseconds
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u32,

    /// Sentinel settings for the redis_sentinel backend
    #[serde(default)]
    pub sentinel: SentinelConfig,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            username: None,
            password: None,
            namespace: default_namespace(),
            command_timeout_ms: default_command_timeout(),
            reconnect_max_attempts: 0,
            reconnect_min_delay_ms: default_reconnect_min_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            sentinel: SentinelConfig::default(),
        }
    }
}

impl RedisConfig {
    /// Per-command deadline.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_namespace() -> String {
    "verigate".to_string()
}

fn default_command_timeout() -> u64 {
    500
}

fn default_reconnect_min_delay() -> u32 {
    100
}

fn default_reconnect_max_delay() -> u32 {
    30_000
}

/// Sentinel topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Sentinel addresses as `host:port`
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Name of the monitored master
    #[serde(default = "default_master_name")]
    pub master_name: String,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            master_name: default_master_name(),
        }
    }
}

fn default_master_name() -> String {
    "mymaster".to_string()
}

impl VerigateConfig {
    /// Load from an optional YAML file, then apply `VERIGATE__*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::with_name(path).format(::config::FileFormat::Yaml),
            );
        }

        let config: VerigateConfig = builder
            .add_source(
                ::config::Environment::with_prefix("VERIGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("redis.sentinel.hosts")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| VerigateError::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: VerigateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| VerigateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.email.policy()?;
        self.rate_limiting.ip.policy()?;

        if self.token.link_ttl_secs == 0 {
            return Err(VerigateError::Config(
                "token.link_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.redis.command_timeout_ms == 0 {
            return Err(VerigateError::Config(
                "redis.command_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.redis.reconnect_min_delay_ms > self.redis.reconnect_max_delay_ms {
            return Err(VerigateError::Config(
                "redis.reconnect_min_delay_ms must not exceed reconnect_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Lifetime of minted verification links.
    pub fn link_ttl(&self) -> Duration {
        Duration::from_secs(self.token.link_ttl_secs)
    }
}
