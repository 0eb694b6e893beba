//! Rate limit policies, dimensions and decisions.

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, VerigateError};

/// Longest window a policy accepts.
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Fixed-window policy: at most `limit` hits per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    limit: u32,
    window: Duration,
}

impl Policy {
    /// Create a policy. Both the limit and the window must be non-zero, and
    /// the window may not exceed [`MAX_WINDOW`].
    pub fn new(limit: u32, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(VerigateError::Config(
                "rate limit must allow at least one request".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(VerigateError::Config(
                "rate limit window must be longer than zero".to_string(),
            ));
        }
        if window > MAX_WINDOW {
            return Err(VerigateError::Config(format!(
                "rate limit window {}s exceeds the maximum of {}s",
                window.as_secs(),
                MAX_WINDOW.as_secs()
            )));
        }
        Ok(Self { limit, window })
    }

    /// Maximum hits allowed in one window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Length of the window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// An independent rate limiting axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Requester network address
    Ip,
    /// Target email identity
    Email,
}

impl Dimension {
    /// Tag used in counter keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Ip => "ip",
            Dimension::Email => "email",
        }
    }

    /// Counter key for `identifier` in this dimension, e.g. `ip:1.2.3.4`.
    pub fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.as_str(), identifier)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow/deny answer with the cooldown the caller should advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// How long to wait before retrying (zero when allowed)
    #[serde(rename = "retry_after_secs", serialize_with = "serialize_secs")]
    pub retry_after: Duration,
}

fn serialize_secs<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

impl Decision {
    /// An allowing decision with no cooldown.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    /// A denying decision with the given cooldown.
    pub fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_rejects_out_of_range_values() {
        assert!(Policy::new(0, Duration::from_secs(60)).is_err());
        assert!(Policy::new(5, Duration::ZERO).is_err());

        assert!(Policy::new(5, Duration::from_secs(u64::MAX)).is_err());
        assert!(Policy::new(5, MAX_WINDOW + Duration::from_secs(1)).is_err());
        assert!(Policy::new(5, MAX_WINDOW).is_ok());

        let policy = Policy::new(5, Duration::from_secs(1800)).unwrap();
        assert_eq!(policy.limit(), 5);
        assert_eq!(policy.window(), Duration::from_secs(1800));
    }

    #[test]
    fn test_dimension_keys() {
        assert_eq!(Dimension::Ip.key("1.2.3.4"), "ip:1.2.3.4");
        assert_eq!(Dimension::Email.key("a@example.com"), "email:a@example.com");
        assert_eq!(Dimension::Email.to_string(), "email");
    }

    #[test]
    fn test_decision_constructors() {
        assert_eq!(Decision::allow().retry_after, Duration::ZERO);
        assert!(Decision::allow().allowed);

        let denied = Decision::deny(Duration::from_secs(30));
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(30));
    }

    #[test]
    fn test_decision_serializes_whole_seconds() {
        let json = serde_json::to_value(Decision::deny(Duration::from_millis(90_500))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "allowed": false, "retry_after_secs": 90 })
        );
    }
}
